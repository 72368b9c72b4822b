//! Dispatch table mapping trackable property names to accessor pairs
//!
//! Most properties follow a regular getter/setter pattern, but a handful
//! route to differently named accessors on the widget (the renderer type,
//! filters, mappings, grouping). The table is an explicit closed map, not a
//! naming convention: a property without an entry cannot be tracked, and the
//! table checks itself against [`TRACKED_PROPERTIES`] when it is first
//! built, so a missing entry fails loudly instead of silently dropping
//! history.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{bail, Context};
use serde_json::{json, Value};

use crate::widget::filter::{restore_filter, serialize_filter};
use crate::widget::{Column, Ranking};

/// Source of a generic property change: a column or the ranking itself.
#[derive(Debug, Clone)]
pub enum PropTarget {
    Column(Column),
    Ranking(Ranking),
}

impl PropTarget {
    fn column(&self, prop: &str) -> anyhow::Result<&Column> {
        match self {
            PropTarget::Column(c) => Ok(c),
            PropTarget::Ranking(_) => bail!("property '{prop}' is not a ranking property"),
        }
    }

    fn ranking(&self, prop: &str) -> anyhow::Result<&Ranking> {
        match self {
            PropTarget::Ranking(r) => Ok(r),
            PropTarget::Column(_) => bail!("property '{prop}' is not a column property"),
        }
    }
}

pub struct PropertyAccessor {
    pub get: fn(&PropTarget) -> anyhow::Result<Value>,
    pub set: fn(&PropTarget, Value) -> anyhow::Result<()>,
}

/// Every property name the tracking manager records.
pub const TRACKED_PROPERTIES: &[&str] = &[
    "metaData",
    "width",
    "rendererType",
    "groupRenderer",
    "summaryRenderer",
    "sortMethod",
    "filter",
    "mapping",
    "grouping",
    "script",
    "weights",
    "aggregation",
];

static TABLE: OnceLock<HashMap<&'static str, PropertyAccessor>> = OnceLock::new();

/// Look up the accessor pair for a property name.
pub fn accessor(prop: &str) -> Option<&'static PropertyAccessor> {
    TABLE.get_or_init(build_table).get(prop)
}

fn as_string(value: &Value) -> anyhow::Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("expected a string, got {value}"))
}

fn opt_value(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

fn build_table() -> HashMap<&'static str, PropertyAccessor> {
    let mut table: HashMap<&'static str, PropertyAccessor> = HashMap::new();

    table.insert(
        "metaData",
        PropertyAccessor {
            get: |t| Ok(t.column("metaData")?.meta_data()),
            set: |t, v| {
                t.column("metaData")?.set_meta_data(v);
                Ok(())
            },
        },
    );
    table.insert(
        "width",
        PropertyAccessor {
            get: |t| Ok(json!(t.column("width")?.width())),
            set: |t, v| {
                let width = v.as_f64().context("width must be a number")?;
                t.column("width")?.set_width(width);
                Ok(())
            },
        },
    );
    // irregular: the widget names this accessor pair renderer/set_renderer
    table.insert(
        "rendererType",
        PropertyAccessor {
            get: |t| Ok(json!(t.column("rendererType")?.renderer())),
            set: |t, v| {
                t.column("rendererType")?.set_renderer(as_string(&v)?);
                Ok(())
            },
        },
    );
    table.insert(
        "groupRenderer",
        PropertyAccessor {
            get: |t| Ok(json!(t.column("groupRenderer")?.group_renderer())),
            set: |t, v| {
                t.column("groupRenderer")?.set_group_renderer(as_string(&v)?);
                Ok(())
            },
        },
    );
    table.insert(
        "summaryRenderer",
        PropertyAccessor {
            get: |t| Ok(json!(t.column("summaryRenderer")?.summary_renderer())),
            set: |t, v| {
                t.column("summaryRenderer")?
                    .set_summary_renderer(as_string(&v)?);
                Ok(())
            },
        },
    );
    table.insert(
        "sortMethod",
        PropertyAccessor {
            get: |t| Ok(json!(t.column("sortMethod")?.sort_method())),
            set: |t, v| {
                t.column("sortMethod")?.set_sort_method(as_string(&v)?);
                Ok(())
            },
        },
    );
    // irregular: values pass through the tagged filter serialization
    table.insert(
        "filter",
        PropertyAccessor {
            get: |t| Ok(serialize_filter(t.column("filter")?.filter().as_ref())),
            set: |t, v| {
                let filter = restore_filter(&v)?;
                t.column("filter")?.set_filter(filter);
                Ok(())
            },
        },
    );
    table.insert(
        "mapping",
        PropertyAccessor {
            get: |t| Ok(json!(t.column("mapping")?.mapping())),
            set: |t, v| {
                t.column("mapping")?.set_mapping(opt_value(v))?;
                Ok(())
            },
        },
    );
    table.insert(
        "grouping",
        PropertyAccessor {
            get: |t| Ok(json!(t.column("grouping")?.grouping())),
            set: |t, v| {
                t.column("grouping")?.set_grouping(opt_value(v))?;
                Ok(())
            },
        },
    );
    table.insert(
        "script",
        PropertyAccessor {
            get: |t| Ok(json!(t.column("script")?.script())),
            set: |t, v| {
                let script = match v {
                    Value::Null => None,
                    v => Some(as_string(&v)?),
                };
                t.column("script")?.set_script(script)?;
                Ok(())
            },
        },
    );
    table.insert(
        "weights",
        PropertyAccessor {
            get: |t| Ok(json!(t.column("weights")?.weights())),
            set: |t, v| {
                let weights: Vec<f64> =
                    serde_json::from_value(v).context("weights must be a number array")?;
                t.column("weights")?.set_weights(weights)?;
                Ok(())
            },
        },
    );
    table.insert(
        "aggregation",
        PropertyAccessor {
            get: |t| Ok(t.ranking("aggregation")?.aggregation()),
            set: |t, v| {
                t.ranking("aggregation")?.set_aggregation(v);
                Ok(())
            },
        },
    );

    for prop in TRACKED_PROPERTIES {
        assert!(
            table.contains_key(prop),
            "trackable property '{prop}' has no accessor entry"
        );
    }
    assert_eq!(table.len(), TRACKED_PROPERTIES.len());
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::ColumnKind;

    #[test]
    fn test_table_is_exhaustive() {
        for prop in TRACKED_PROPERTIES {
            assert!(accessor(prop).is_some(), "missing accessor for {prop}");
        }
        assert!(accessor("unknownProp").is_none());
    }

    #[test]
    fn test_irregular_renderer_accessor() {
        let col = Column::new(ColumnKind::Text, "Name");
        let target = PropTarget::Column(col.clone());
        let acc = accessor("rendererType").unwrap();
        (acc.set)(&target, json!("histogram")).unwrap();
        assert_eq!(col.renderer(), "histogram");
        assert_eq!((acc.get)(&target).unwrap(), json!("histogram"));
    }

    #[test]
    fn test_filter_accessor_round_trips_pattern() {
        let col = Column::new(ColumnKind::Text, "Name");
        let target = PropTarget::Column(col.clone());
        let acc = accessor("filter").unwrap();
        let serialized =
            json!({ "filter": { "value": "^abc", "isRegExp": true }, "filterMissing": true });
        (acc.set)(&target, serialized.clone()).unwrap();
        assert_eq!((acc.get)(&target).unwrap(), serialized);
    }

    #[test]
    fn test_aggregation_targets_ranking() {
        let ranking = Ranking::new();
        ranking.set_auto_settle(false);
        let target = PropTarget::Ranking(ranking.clone());
        let acc = accessor("aggregation").unwrap();
        (acc.set)(&target, json!({ "topN": 10 })).unwrap();
        assert_eq!(ranking.aggregation(), json!({ "topN": 10 }));
        assert!((acc.get)(&PropTarget::Column(Column::new(ColumnKind::Text, "x"))).is_err());
    }
}
