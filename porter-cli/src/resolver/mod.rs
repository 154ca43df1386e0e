//! Dependency resolution: discover units and order them so parents are
//! imported before the children that reference them

mod discover;
mod graph;

pub use discover::*;
pub use graph::*;

use std::collections::BTreeMap;
use std::path::Path;

use crate::registry::EntityRegistry;

/// Notes gathered while resolving the import order
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    /// Entity names in import order (empty on a cycle)
    pub order: Vec<String>,
    pub parse_failures: Vec<ParseFailure>,
    pub nullable_edges: Vec<DeclaredDependency>,
    pub optional_dependencies: Vec<DeclaredDependency>,
    pub missing_hard_dependencies: Vec<DeclaredDependency>,
    pub unknown_entities: Vec<String>,
    pub cycle: Option<CycleError>,
}

impl ResolutionReport {
    pub fn has_cycle(&self) -> bool {
        self.cycle.is_some()
    }
}

/// Ordered units plus the report explaining the order
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub units: Vec<ImportUnit>,
    pub report: ResolutionReport,
}

impl Resolution {
    /// Locators in application order
    pub fn locators(&self) -> Vec<String> {
        self.units.iter().map(ImportUnit::locator_name).collect()
    }
}

/// Orders import units using the registry's declared dependencies
pub struct DependencyResolver<'a> {
    registry: &'a dyn EntityRegistry,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(registry: &'a dyn EntityRegistry) -> Self {
        Self { registry }
    }

    /// Discover units under `source_root` and order them
    pub fn resolve_import_order(&self, source_root: &Path) -> Resolution {
        let (units, parse_failures) = discover(source_root);
        let mut resolution = self.order_units(units);
        resolution.report.parse_failures = parse_failures;
        resolution
    }

    /// Order already-parsed units
    pub fn order_units(&self, units: Vec<ImportUnit>) -> Resolution {
        if units.is_empty() {
            log::warn!("No importable units found");
            return Resolution::default();
        }

        let mut by_entity: BTreeMap<String, Vec<ImportUnit>> = BTreeMap::new();
        for unit in units {
            by_entity.entry(unit.entity_name.clone()).or_default().push(unit);
        }

        let build = DependencyGraph::build(by_entity.keys().cloned(), self.registry);

        for note in &build.optional_dependencies {
            log::info!(
                "Optional dependency {}: {} should already exist in the target store",
                note,
                note.dependency
            );
        }
        for edge in &build.nullable_edges {
            log::info!("Nullable dependency {} does not constrain the order", edge);
        }
        for missing in &build.missing_hard_dependencies {
            log::warn!(
                "Missing hard dependency {}: {} is not in this batch and must already exist in the target store",
                missing,
                missing.dependency
            );
        }
        for unknown in &build.unknown_entities {
            log::warn!("Entity '{}' is not described by the registry", unknown);
        }

        let mut report = ResolutionReport {
            nullable_edges: build.nullable_edges,
            optional_dependencies: build.optional_dependencies,
            missing_hard_dependencies: build.missing_hard_dependencies,
            unknown_entities: build.unknown_entities,
            ..ResolutionReport::default()
        };

        let order = match build.graph.topological_sort() {
            Ok(order) => order,
            Err(cycle) => {
                log::error!("{}", cycle);
                report.cycle = Some(cycle);
                return Resolution {
                    units: Vec::new(),
                    report,
                };
            }
        };

        log::info!("Resolved import order: {}", order.join(" -> "));

        let mut ordered = Vec::new();
        for entity in &order {
            if let Some(mut units) = by_entity.remove(entity) {
                units.sort_by_key(ImportUnit::locator_name);
                ordered.extend(units);
            }
        }

        report.order = order;
        Resolution {
            units: ordered,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ColumnDescriptor, EntityDescriptor, StaticRegistry};
    use serde_json::json;

    fn unit(locator: &str, entity: &str) -> ImportUnit {
        let mut document = serde_json::Map::new();
        document.insert(entity.to_string(), json!({"data": []}));
        ImportUnit::from_document(locator, serde_json::Value::Object(document)).unwrap()
    }

    fn registry() -> StaticRegistry {
        StaticRegistry::new(vec![
            EntityDescriptor::new("Vendor", "vendors"),
            EntityDescriptor::new("Widget", "widgets")
                .with_column(ColumnDescriptor::new("vendor_id").required().references("vendors"))
                .with_dependency("Vendor"),
            EntityDescriptor::new("LineItem", "line_items")
                .with_column(ColumnDescriptor::new("widget_id").required().references("widgets"))
                .with_column(ColumnDescriptor::new("coupon_id").references("coupons"))
                .with_dependency("Widget")
                .with_dependency("Coupon"),
            EntityDescriptor::new("Coupon", "coupons"),
            EntityDescriptor::new("Chicken", "chickens")
                .with_column(ColumnDescriptor::new("egg_id").required().references("eggs"))
                .with_dependency("Egg"),
            EntityDescriptor::new("Egg", "eggs")
                .with_column(ColumnDescriptor::new("chicken_id").required().references("chickens"))
                .with_dependency("Chicken"),
        ])
        .unwrap()
    }

    #[test]
    fn test_units_follow_dependency_order() {
        let reg = registry();
        let resolver = DependencyResolver::new(&reg);

        let resolution = resolver.order_units(vec![
            unit("b/line_items.yaml", "LineItem"),
            unit("z/widgets-2.yaml", "Widget"),
            unit("a/widgets-1.yaml", "Widget"),
            unit("vendors.yaml", "Vendor"),
        ]);

        assert_eq!(resolution.report.order, vec!["Vendor", "Widget", "LineItem"]);
        assert_eq!(
            resolution.locators(),
            vec!["vendors.yaml", "a/widgets-1.yaml", "z/widgets-2.yaml", "b/line_items.yaml"]
        );
    }

    #[test]
    fn test_cycle_returns_empty_order() {
        let reg = registry();
        let resolver = DependencyResolver::new(&reg);

        let resolution = resolver.order_units(vec![
            unit("chickens.yaml", "Chicken"),
            unit("eggs.yaml", "Egg"),
            unit("vendors.yaml", "Vendor"),
        ]);

        assert!(resolution.units.is_empty());
        assert!(resolution.report.order.is_empty());
        let cycle = resolution.report.cycle.unwrap();
        assert_eq!(cycle.entities, vec!["Chicken", "Egg"]);
    }

    #[test]
    fn test_optional_and_missing_dependencies_do_not_block() {
        let reg = registry();
        let resolver = DependencyResolver::new(&reg);

        // Coupon is nullable and absent, Widget is hard and absent
        let resolution = resolver.order_units(vec![unit("line_items.yaml", "LineItem")]);

        assert_eq!(resolution.report.order, vec!["LineItem"]);
        assert_eq!(resolution.units.len(), 1);
        assert_eq!(resolution.report.optional_dependencies.len(), 1);
        assert_eq!(resolution.report.optional_dependencies[0].dependency, "Coupon");
        assert_eq!(resolution.report.missing_hard_dependencies.len(), 1);
        assert_eq!(resolution.report.missing_hard_dependencies[0].dependency, "Widget");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let reg = registry();
        let resolver = DependencyResolver::new(&reg);
        let units = vec![
            unit("coupons.yaml", "Coupon"),
            unit("vendors.yaml", "Vendor"),
            unit("line_items.yaml", "LineItem"),
            unit("widgets.yaml", "Widget"),
        ];

        let first = resolver.order_units(units.clone()).locators();
        let mut reversed = units;
        reversed.reverse();
        assert_eq!(resolver.order_units(reversed).locators(), first);
        assert_eq!(first, vec!["coupons.yaml", "vendors.yaml", "widgets.yaml", "line_items.yaml"]);
    }

    #[test]
    fn test_resolve_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("1-line.yaml"),
            "LineItem:\n  meta:\n    storageName: line_items\n  data: []\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("2-widget.json"),
            r#"{"Widget": {"meta": {"storageName": "widgets"}, "data": []}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("3-bad.yaml"), "").unwrap();

        let reg = registry();
        let resolution = DependencyResolver::new(&reg).resolve_import_order(dir.path());

        assert_eq!(resolution.report.order, vec!["Widget", "LineItem"]);
        assert_eq!(resolution.report.parse_failures.len(), 1);
    }

    #[test]
    fn test_empty_source() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let resolution = DependencyResolver::new(&reg).resolve_import_order(dir.path());
        assert!(resolution.units.is_empty());
        assert!(!resolution.report.has_cycle());
    }
}
