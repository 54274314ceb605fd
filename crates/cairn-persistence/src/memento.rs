//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Memento persistence abstractions and storage bindings."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
//! Memento data model: per-object records, the full graph, the manifest and deltas.

use std::fmt;
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered string-keyed bag of JSON values carried in a memento body.
pub type Properties = IndexMap<String, Value>;

/// Store category; each maps to one subdirectory of the store root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Entity mementos.
    Entities,
    /// Location mementos.
    Locations,
    /// Policy mementos.
    Policies,
    /// Reserved for management-plane records; validated but never loaded.
    Plane,
}

impl Category {
    /// Every directory the store lays out.
    pub const ALL: [Category; 4] = [
        Category::Entities,
        Category::Locations,
        Category::Policies,
        Category::Plane,
    ];

    /// Categories that hold mementos, in load order.
    pub const MEMENTOS: [Category; 3] = [
        Category::Entities,
        Category::Locations,
        Category::Policies,
    ];

    /// Name of the subdirectory backing this category.
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Entities => "entities",
            Category::Locations => "locations",
            Category::Policies => "policies",
            Category::Plane => "plane",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "entities" | "entity" => Ok(Category::Entities),
            "locations" | "location" => Ok(Category::Locations),
            "policies" | "policy" => Ok(Category::Policies),
            "plane" => Ok(Category::Plane),
            other => Err(format!("unknown memento category: {}", other)),
        }
    }
}

/// Typed pointer from one memento to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Category of the referenced memento.
    pub category: Category,
    /// Identifier of the referenced memento.
    pub id: String,
}

impl Reference {
    /// Build a reference to `category/id`.
    pub fn new(category: Category, id: impl Into<String>) -> Self {
        Self {
            category,
            id: id.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.id)
    }
}

/// A reference found during load that points at nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    /// Memento holding the reference.
    pub from: Reference,
    /// Target that could not be resolved.
    pub to: Reference,
}

impl fmt::Display for DanglingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Durable state of one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMemento {
    /// Identifier, unique among entities.
    pub id: String,
    /// Originating entity type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Whether the entity is a top-level application.
    #[serde(default)]
    pub top_level: bool,
    /// Parent entity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Child entities.
    #[serde(default)]
    pub children: Vec<String>,
    /// Locations the entity runs in.
    #[serde(default)]
    pub locations: Vec<String>,
    /// Policies attached to the entity.
    #[serde(default)]
    pub policies: Vec<String>,
    /// Configuration values.
    #[serde(default)]
    pub config: Properties,
    /// Sensor/attribute values.
    #[serde(default)]
    pub attributes: Properties,
}

impl EntityMemento {
    /// Create an entity memento with an empty body.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Mark the entity as a top-level application.
    pub fn top_level(mut self) -> Self {
        self.top_level = true;
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the parent entity.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Add a child entity.
    pub fn with_child(mut self, child: impl Into<String>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Add a location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.locations.push(location.into());
        self
    }

    /// Attach a policy.
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policies.push(policy.into());
        self
    }

    /// Record a configuration value.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Record an attribute value.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        if let Some(parent) = &self.parent {
            refs.push(Reference::new(Category::Entities, parent.clone()));
        }
        refs.extend(
            self.children
                .iter()
                .map(|id| Reference::new(Category::Entities, id.clone())),
        );
        refs.extend(
            self.locations
                .iter()
                .map(|id| Reference::new(Category::Locations, id.clone())),
        );
        refs.extend(
            self.policies
                .iter()
                .map(|id| Reference::new(Category::Policies, id.clone())),
        );
        refs
    }
}

/// Durable state of one location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationMemento {
    /// Identifier, unique among locations.
    pub id: String,
    /// Originating location type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Enclosing location, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Nested locations.
    #[serde(default)]
    pub children: Vec<String>,
    /// Configuration values.
    #[serde(default)]
    pub config: Properties,
}

impl LocationMemento {
    /// Create a location memento with an empty body.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the enclosing location.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Add a nested location.
    pub fn with_child(mut self, child: impl Into<String>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Record a configuration value.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    fn references(&self) -> Vec<Reference> {
        self.parent
            .iter()
            .chain(self.children.iter())
            .map(|id| Reference::new(Category::Locations, id.clone()))
            .collect()
    }
}

/// Durable state of one policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyMemento {
    /// Identifier, unique among policies.
    pub id: String,
    /// Originating policy type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Entity the policy is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Configuration values.
    #[serde(default)]
    pub config: Properties,
    /// Runtime flags.
    #[serde(default)]
    pub flags: Properties,
}

impl PolicyMemento {
    /// Create a policy memento with an empty body.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Attach the policy to an entity.
    pub fn attached_to(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Record a configuration value.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Record a runtime flag.
    pub fn with_flag(mut self, key: impl Into<String>, value: Value) -> Self {
        self.flags.insert(key.into(), value);
        self
    }

    fn references(&self) -> Vec<Reference> {
        self.entity
            .iter()
            .map(|id| Reference::new(Category::Entities, id.clone()))
            .collect()
    }
}

/// Any persisted memento; the `category` tag makes documents self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum Memento {
    /// Entity memento.
    Entity(EntityMemento),
    /// Location memento.
    Location(LocationMemento),
    /// Policy memento.
    Policy(PolicyMemento),
}

impl Memento {
    /// Store category the memento is written to.
    pub fn category(&self) -> Category {
        match self {
            Memento::Entity(_) => Category::Entities,
            Memento::Location(_) => Category::Locations,
            Memento::Policy(_) => Category::Policies,
        }
    }

    /// Memento identifier.
    pub fn id(&self) -> &str {
        match self {
            Memento::Entity(m) => &m.id,
            Memento::Location(m) => &m.id,
            Memento::Policy(m) => &m.id,
        }
    }

    /// Originating type of the memento.
    pub fn kind(&self) -> &str {
        match self {
            Memento::Entity(m) => &m.kind,
            Memento::Location(m) => &m.kind,
            Memento::Policy(m) => &m.kind,
        }
    }

    /// Outgoing references to other mementos.
    pub fn references(&self) -> Vec<Reference> {
        match self {
            Memento::Entity(m) => m.references(),
            Memento::Location(m) => m.references(),
            Memento::Policy(m) => m.references(),
        }
    }
}

impl From<EntityMemento> for Memento {
    fn from(memento: EntityMemento) -> Self {
        Memento::Entity(memento)
    }
}

impl From<LocationMemento> for Memento {
    fn from(memento: LocationMemento) -> Self {
        Memento::Location(memento)
    }
}

impl From<PolicyMemento> for Memento {
    fn from(memento: PolicyMemento) -> Self {
        Memento::Policy(memento)
    }
}

/// Full object graph: every memento by category plus the application ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MementoGraph {
    entities: IndexMap<String, EntityMemento>,
    locations: IndexMap<String, LocationMemento>,
    policies: IndexMap<String, PolicyMemento>,
    application_ids: IndexSet<String>,
    dangling: Vec<DanglingReference>,
}

impl MementoGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a memento of any kind.
    pub fn insert(&mut self, memento: impl Into<Memento>) {
        match memento.into() {
            Memento::Entity(m) => self.insert_entity(m),
            Memento::Location(m) => self.insert_location(m),
            Memento::Policy(m) => self.insert_policy(m),
        }
    }

    /// Builder-style [`MementoGraph::insert`].
    pub fn with(mut self, memento: impl Into<Memento>) -> Self {
        self.insert(memento);
        self
    }

    /// Insert or replace an entity, keeping the application-id set in step.
    pub fn insert_entity(&mut self, memento: EntityMemento) {
        if memento.top_level {
            self.application_ids.insert(memento.id.clone());
        } else {
            self.application_ids.shift_remove(&memento.id);
        }
        self.entities.insert(memento.id.clone(), memento);
    }

    /// Insert or replace a location.
    pub fn insert_location(&mut self, memento: LocationMemento) {
        self.locations.insert(memento.id.clone(), memento);
    }

    /// Insert or replace a policy.
    pub fn insert_policy(&mut self, memento: PolicyMemento) {
        self.policies.insert(memento.id.clone(), memento);
    }

    /// Entity mementos by id.
    pub fn entities(&self) -> &IndexMap<String, EntityMemento> {
        &self.entities
    }

    /// Location mementos by id.
    pub fn locations(&self) -> &IndexMap<String, LocationMemento> {
        &self.locations
    }

    /// Policy mementos by id.
    pub fn policies(&self) -> &IndexMap<String, PolicyMemento> {
        &self.policies
    }

    /// Look up an entity.
    pub fn entity(&self, id: &str) -> Option<&EntityMemento> {
        self.entities.get(id)
    }

    /// Look up a location.
    pub fn location(&self, id: &str) -> Option<&LocationMemento> {
        self.locations.get(id)
    }

    /// Look up a policy.
    pub fn policy(&self, id: &str) -> Option<&PolicyMemento> {
        self.policies.get(id)
    }

    /// Ids of top-level entities.
    pub fn application_ids(&self) -> &IndexSet<String> {
        &self.application_ids
    }

    /// References that resolved neither within the graph nor via the lookup context.
    pub fn dangling_references(&self) -> &[DanglingReference] {
        &self.dangling
    }

    pub(crate) fn set_dangling_references(&mut self, dangling: Vec<DanglingReference>) {
        self.dangling = dangling;
    }

    /// Whether the graph holds the referenced memento.
    pub fn contains(&self, reference: &Reference) -> bool {
        match reference.category {
            Category::Entities => self.entities.contains_key(&reference.id),
            Category::Locations => self.locations.contains_key(&reference.id),
            Category::Policies => self.policies.contains_key(&reference.id),
            Category::Plane => false,
        }
    }

    /// Every memento in category order, cloned into the tagged form.
    pub fn mementos(&self) -> impl Iterator<Item = Memento> + '_ {
        self.entities
            .values()
            .cloned()
            .map(Memento::from)
            .chain(self.locations.values().cloned().map(Memento::from))
            .chain(self.policies.values().cloned().map(Memento::from))
    }

    /// Total number of mementos.
    pub fn len(&self) -> usize {
        self.entities.len() + self.locations.len() + self.policies.len()
    }

    /// Whether the graph holds no mementos.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lightweight id → type inventory of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MementoManifest {
    entities: IndexMap<String, String>,
    locations: IndexMap<String, String>,
    policies: IndexMap<String, String>,
}

impl MementoManifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id/type pair; plane entries are ignored.
    pub fn insert(&mut self, category: Category, id: impl Into<String>, kind: impl Into<String>) {
        let target = match category {
            Category::Entities => &mut self.entities,
            Category::Locations => &mut self.locations,
            Category::Policies => &mut self.policies,
            Category::Plane => return,
        };
        target.insert(id.into(), kind.into());
    }

    /// Id → type map for a memento category; `None` for the plane.
    pub fn ids_to_type(&self, category: Category) -> Option<&IndexMap<String, String>> {
        match category {
            Category::Entities => Some(&self.entities),
            Category::Locations => Some(&self.locations),
            Category::Policies => Some(&self.policies),
            Category::Plane => None,
        }
    }

    /// Entity id → type.
    pub fn entity_ids_to_type(&self) -> &IndexMap<String, String> {
        &self.entities
    }

    /// Location id → type.
    pub fn location_ids_to_type(&self) -> &IndexMap<String, String> {
        &self.locations
    }

    /// Policy id → type.
    pub fn policy_ids_to_type(&self) -> &IndexMap<String, String> {
        &self.policies
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entities.len() + self.locations.len() + self.policies.len()
    }

    /// Whether the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Incremental change set: upserts followed by removals, per category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    /// Entities to write.
    pub entities: Vec<EntityMemento>,
    /// Locations to write.
    pub locations: Vec<LocationMemento>,
    /// Policies to write.
    pub policies: Vec<PolicyMemento>,
    /// Entity ids to delete.
    pub removed_entity_ids: Vec<String>,
    /// Location ids to delete.
    pub removed_location_ids: Vec<String>,
    /// Policy ids to delete.
    pub removed_policy_ids: Vec<String>,
}

impl Delta {
    /// Create an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an upsert of any memento kind.
    pub fn upsert(mut self, memento: impl Into<Memento>) -> Self {
        match memento.into() {
            Memento::Entity(m) => self.entities.push(m),
            Memento::Location(m) => self.locations.push(m),
            Memento::Policy(m) => self.policies.push(m),
        }
        self
    }

    /// Add a removal; plane removals are ignored.
    pub fn remove(mut self, category: Category, id: impl Into<String>) -> Self {
        match category {
            Category::Entities => self.removed_entity_ids.push(id.into()),
            Category::Locations => self.removed_location_ids.push(id.into()),
            Category::Policies => self.removed_policy_ids.push(id.into()),
            Category::Plane => {}
        }
        self
    }

    /// Upserts in category order.
    pub fn upserts(&self) -> impl Iterator<Item = Memento> + '_ {
        self.entities
            .iter()
            .cloned()
            .map(Memento::from)
            .chain(self.locations.iter().cloned().map(Memento::from))
            .chain(self.policies.iter().cloned().map(Memento::from))
    }

    /// Removed ids for one category.
    pub fn removed_ids(&self, category: Category) -> &[String] {
        match category {
            Category::Entities => &self.removed_entity_ids,
            Category::Locations => &self.removed_location_ids,
            Category::Policies => &self.removed_policy_ids,
            Category::Plane => &[],
        }
    }

    /// Number of upserts.
    pub fn upsert_count(&self) -> usize {
        self.entities.len() + self.locations.len() + self.policies.len()
    }

    /// Number of removals.
    pub fn removal_count(&self) -> usize {
        self.removed_entity_ids.len() + self.removed_location_ids.len() + self.removed_policy_ids.len()
    }

    /// Whether the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.upsert_count() == 0 && self.removal_count() == 0
    }
}
