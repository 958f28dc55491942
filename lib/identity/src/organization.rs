//! Organizations, their sub-units and service categories.

use ensemble_core::{CategoryId, OrganizationId, SubUnitId, UserId};
use serde::{Deserialize, Serialize};

/// A tenant organization as loaded for an organization-scoped member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Member who administers the organization.
    pub admin_id: UserId,
    #[serde(default)]
    pub sub_units: Vec<SubUnit>,
    #[serde(default)]
    pub service_categories: Vec<ServiceCategory>,
}

impl Organization {
    /// Creates an organization with no contact details, sub-units or
    /// categories.
    #[must_use]
    pub fn new(id: OrganizationId, name: impl Into<String>, admin_id: UserId) -> Self {
        Self {
            id,
            name: name.into(),
            email: None,
            phone: None,
            address: None,
            admin_id,
            sub_units: Vec::new(),
            service_categories: Vec::new(),
        }
    }

    /// Adds a sub-unit.
    #[must_use]
    pub fn with_sub_unit(mut self, unit: SubUnit) -> Self {
        self.sub_units.push(unit);
        self
    }

    /// Adds a service category.
    #[must_use]
    pub fn with_category(mut self, category: ServiceCategory) -> Self {
        self.service_categories.push(category);
        self
    }

    /// Sub-units that have no parent.
    pub fn top_level_units(&self) -> impl Iterator<Item = &SubUnit> {
        self.sub_units.iter().filter(|unit| unit.parent_id.is_none())
    }

    /// Direct children of `parent`.
    pub fn children_of(&self, parent: SubUnitId) -> impl Iterator<Item = &SubUnit> {
        self.sub_units
            .iter()
            .filter(move |unit| unit.parent_id == Some(parent))
    }

    /// Sub-units led by `user`.
    pub fn sub_units_led_by(&self, user: UserId) -> impl Iterator<Item = &SubUnit> {
        self.sub_units
            .iter()
            .filter(move |unit| unit.leader_id == Some(user))
    }

    /// Looks up a sub-unit by id.
    #[must_use]
    pub fn sub_unit(&self, id: SubUnitId) -> Option<&SubUnit> {
        self.sub_units.iter().find(|unit| unit.id == id)
    }
}

/// A department-like grouping inside an organization (worship team, choir,
/// media crew).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUnit {
    pub id: SubUnitId,
    pub name: String,
    /// Free-form category label, e.g. `music` or `media`.
    pub category: String,
    pub leader_id: Option<UserId>,
    pub parent_id: Option<SubUnitId>,
    /// True if this unit is itself nested inside another unit.
    #[serde(default)]
    pub is_nested: bool,
}

impl SubUnit {
    /// Creates a top-level sub-unit without a leader.
    #[must_use]
    pub fn new(id: SubUnitId, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            category: category.into(),
            leader_id: None,
            parent_id: None,
            is_nested: false,
        }
    }

    /// Sets the leader.
    #[must_use]
    pub fn led_by(mut self, leader: UserId) -> Self {
        self.leader_id = Some(leader);
        self
    }

    /// Nests the unit under `parent`.
    #[must_use]
    pub fn nested_in(mut self, parent: SubUnitId) -> Self {
        self.parent_id = Some(parent);
        self.is_nested = true;
        self
    }
}

/// A kind of service or event the organization schedules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCategory {
    pub id: CategoryId,
    pub name: String,
}

impl ServiceCategory {
    /// Creates a category.
    #[must_use]
    pub fn new(id: CategoryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_unit_tree_navigation() {
        let worship = SubUnitId::new();
        let choir = SubUnitId::new();
        let media = SubUnitId::new();
        let leader = UserId::new();

        let org = Organization::new(OrganizationId::new(), "Grace Chapel", UserId::new())
            .with_sub_unit(SubUnit::new(worship, "Worship", "music").led_by(leader))
            .with_sub_unit(SubUnit::new(choir, "Choir", "music").nested_in(worship))
            .with_sub_unit(SubUnit::new(media, "Media", "media"));

        let top: Vec<_> = org.top_level_units().map(|u| u.id).collect();
        assert_eq!(top, vec![worship, media]);

        let children: Vec<_> = org.children_of(worship).map(|u| u.id).collect();
        assert_eq!(children, vec![choir]);
        assert!(org.sub_unit(choir).is_some_and(|u| u.is_nested));

        let led: Vec<_> = org.sub_units_led_by(leader).map(|u| u.id).collect();
        assert_eq!(led, vec![worship]);
    }

    #[test]
    fn missing_lists_deserialize_empty() {
        let id = OrganizationId::new();
        let admin = UserId::new();
        let json = serde_json::json!({
            "id": id,
            "name": "Grace Chapel",
            "email": null,
            "phone": null,
            "address": null,
            "admin_id": admin,
        });
        let org: Organization = serde_json::from_value(json).expect("deserialize");
        assert_eq!(org.id, id);
        assert!(org.sub_units.is_empty());
        assert!(org.service_categories.is_empty());
    }

    #[test]
    fn categories_are_kept_in_order() {
        let org = Organization::new(OrganizationId::new(), "Grace Chapel", UserId::new())
            .with_category(ServiceCategory::new(CategoryId::new(), "Sunday service"))
            .with_category(ServiceCategory::new(CategoryId::new(), "Youth night"));
        let names: Vec<_> = org
            .service_categories
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Sunday service", "Youth night"]);
    }
}
