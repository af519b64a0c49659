use crate::product::{SpecAttribute, TechnicalSpecGroup};
use crate::shopify::{Metafield, SourceProduct};
use crate::spec_group::{upsert_labels, SpecGroupRepository};
use crate::spec_item::{upsert_label, StandaloneSpecItemRepository};
use crate::title_case;

/// Namespaces that carry no grouping intent of their own.
pub const GENERIC_NAMESPACES: [&str; 4] = ["", "custom", "global", "my_fields"];

/// Synthetic bucket for specs that arrive without a group. It never gets a
/// group record of its own; its members live as standalone items.
pub const UNGROUPED_GROUP: &str = "GENERAL";

/// Placeholder option name on products without real options.
const DEFAULT_OPTION_NAME: &str = "Title";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSpec {
    pub group: Option<String>,
    pub label: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedSpecs {
    pub technical_specs: Vec<TechnicalSpecGroup>,
    /// Group names to associate with the product family, `GENERAL` included.
    pub group_names: Vec<String>,
}

/// Spec triples from metafields and product options, source order kept.
pub fn extract(product: &SourceProduct, metafields: &[Metafield]) -> Vec<RawSpec> {
    let mut raw = Vec::new();
    for field in metafields {
        let value = field.value.trim();
        if value.is_empty() {
            continue;
        }
        let namespace = field.namespace.trim();
        let group = (!GENERIC_NAMESPACES.contains(&namespace.to_lowercase().as_str()))
            .then(|| namespace.to_uppercase());
        raw.push(RawSpec {
            group,
            label: title_case(&field.key.replace(['_', '-', '.'], " ")),
            value: value.to_string(),
        });
    }
    let only_default_option =
        product.options.len() == 1 && product.options[0].name.trim() == DEFAULT_OPTION_NAME;
    if !only_default_option {
        for (idx, option) in product.options.iter().enumerate() {
            let position = option.position.unwrap_or(idx + 1);
            let value = product
                .variants
                .first()
                .and_then(|v| v.option_slot(position))
                .or_else(|| option.values.first().map(String::as_str))
                .unwrap_or_default()
                .trim()
                .to_string();
            if value.is_empty() {
                continue;
            }
            let (group, label) = match option.name.split_once('/') {
                Some((group, label)) => (
                    Some(group.trim().to_uppercase()),
                    label.trim().to_string(),
                ),
                None => (None, option.name.trim().to_string()),
            };
            if label.is_empty() {
                continue;
            }
            raw.push(RawSpec { group, label, value });
        }
    }
    raw
}

/// Fold raw specs into display groups and push their labels into the shared
/// taxonomy. Grouped labels grow their group record; ungrouped ones land under
/// [`UNGROUPED_GROUP`] and are registered as standalone items instead.
pub async fn resolve(
    raw: &[RawSpec],
    groups: &dyn SpecGroupRepository,
    items: &dyn StandaloneSpecItemRepository,
) -> Result<ResolvedSpecs, anyhow::Error> {
    let mut ordered: Vec<(String, Vec<SpecAttribute>)> = Vec::new();
    for spec in raw {
        let group = spec
            .group
            .clone()
            .unwrap_or_else(|| UNGROUPED_GROUP.to_string());
        let idx = match ordered.iter().position(|(name, _)| *name == group) {
            Some(idx) => idx,
            None => {
                ordered.push((group, Vec::new()));
                ordered.len() - 1
            }
        };
        let entry = &mut ordered[idx].1;
        // first occurrence of a label wins
        if entry.iter().any(|attr| attr.name == spec.label) {
            continue;
        }
        entry.push(SpecAttribute {
            name: spec.label.clone(),
            value: spec.value.clone(),
        });
    }
    let mut resolved = ResolvedSpecs::default();
    for (group, attrs) in ordered {
        let labels = attrs
            .iter()
            .map(|attr| attr.name.clone())
            .collect::<Vec<_>>();
        if group == UNGROUPED_GROUP {
            for label in &labels {
                upsert_label(items, label).await?;
            }
        } else {
            upsert_labels(groups, &group, &labels).await?;
        }
        resolved.group_names.push(group.clone());
        resolved
            .technical_specs
            .push(TechnicalSpecGroup { group, attributes: attrs });
    }
    Ok(resolved)
}
