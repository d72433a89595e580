use crate::error::{PrepError, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute value as read from a vector label file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Integer(i64),
    Text(String),
}

impl AttributeValue {
    /// Text form shared by both variants; integral numbers written as text
    /// ("4", "4.0") normalize to the same string as `Integer(4)`.
    pub fn normalized(&self) -> String {
        match self {
            AttributeValue::Integer(value) => value.to_string(),
            AttributeValue::Text(text) => {
                let text = text.trim();
                match text.parse::<f64>() {
                    Ok(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                        (n as i64).to_string()
                    }
                    _ => text.to_string(),
                }
            }
        }
    }

    /// Equality across integer and text encodings of the same value.
    pub fn matches(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::Integer(a), AttributeValue::Integer(b)) => a == b,
            _ => self.normalized() == other.normalized(),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Integer(value as i64)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Integer(value) => write!(f, "{}", value),
            AttributeValue::Text(text) => f.write_str(text),
        }
    }
}

/// A label feature: attributes plus its geometry (WKT) and planar area in
/// the units of its CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelFeature {
    pub fid: Option<u64>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub wkt: String,
    pub area: f64,
}

impl LabelFeature {
    pub fn attribute(&self, field: &str) -> Option<&AttributeValue> {
        self.attributes.get(field)
    }
}

pub fn total_area(features: &[LabelFeature]) -> f64 {
    features.iter().map(|f| f.area).sum()
}

/// Resolve an attribute field against the fields present in `features`:
/// the name as given, then its last `/`-separated segment.
pub fn resolve_field(features: &[LabelFeature], field: &str) -> Option<String> {
    let present = |name: &str| features.iter().any(|f| f.attributes.contains_key(name));

    if present(field) {
        return Some(field.to_string());
    }
    let short = field.rsplit('/').next().unwrap_or(field);
    if short != field && present(short) {
        debug!("Attribute field {:?} resolved as {:?}", field, short);
        return Some(short.to_string());
    }
    None
}

/// Keep the features whose `field` equals one of `accepted`.
pub fn try_filter_features(
    features: &[LabelFeature],
    field: &str,
    accepted: &[AttributeValue],
) -> Result<Vec<LabelFeature>> {
    let field = resolve_field(features, field)
        .ok_or_else(|| PrepError::MissingField(field.to_string()))?;

    Ok(features
        .iter()
        .filter(|feature| {
            feature
                .attribute(&field)
                .is_some_and(|value| accepted.iter().any(|a| value.matches(a)))
        })
        .cloned()
        .collect())
}

/// Best-effort attribute filter. Without a field or accepted values, or when
/// the field can't be found, the input comes back unchanged (as a copy).
pub fn filter_features(
    features: &[LabelFeature],
    field: Option<&str>,
    accepted: Option<&[AttributeValue]>,
) -> Vec<LabelFeature> {
    let (Some(field), Some(accepted)) = (field, accepted) else {
        return features.to_vec();
    };
    if field.is_empty() || accepted.is_empty() || features.is_empty() {
        return features.to_vec();
    }

    match try_filter_features(features, field, accepted) {
        Ok(filtered) => filtered,
        Err(e) => {
            let fields: Vec<&String> = features
                .first()
                .map(|f| f.attributes.keys().collect())
                .unwrap_or_default();
            error!("{} (available fields: {:?}), keeping all features", e, fields);
            features.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(fid: u64, field: &str, value: AttributeValue, area: f64) -> LabelFeature {
        let mut attributes = BTreeMap::new();
        attributes.insert(field.to_string(), value);
        LabelFeature {
            fid: Some(fid),
            attributes,
            wkt: "POLYGON ((0 0,1 0,1 1,0 1,0 0))".to_string(),
            area,
        }
    }

    fn buildings() -> Vec<LabelFeature> {
        vec![
            feature(0, "class", 1.into(), 10.0),
            feature(1, "class", 2.into(), 20.0),
            feature(2, "class", 4.into(), 40.0),
        ]
    }

    #[test]
    fn test_identity_without_field_or_values() {
        let features = buildings();
        assert_eq!(filter_features(&features, None, Some(&[1.into()])), features);
        assert_eq!(filter_features(&features, Some("class"), None), features);
        assert_eq!(filter_features(&features, Some(""), Some(&[1.into()])), features);
        assert_eq!(filter_features(&features, Some("class"), Some(&[])), features);
    }

    #[test]
    fn test_filter_keeps_accepted_values() {
        let filtered = filter_features(&buildings(), Some("class"), Some(&[1.into(), 4.into()]));
        let fids: Vec<_> = filtered.iter().map(|f| f.fid.unwrap()).collect();
        assert_eq!(fids, vec![0, 2]);
        assert_eq!(total_area(&filtered), 50.0);
    }

    #[test]
    fn test_filter_is_type_agnostic() {
        let as_text: Vec<_> = buildings()
            .into_iter()
            .map(|mut f| {
                let value = f.attributes["class"].to_string();
                f.attributes.insert("class".into(), AttributeValue::Text(value));
                f
            })
            .collect();

        let numeric_accept = [AttributeValue::Integer(2)];
        let text_accept = [AttributeValue::from("2")];

        let same_typed = filter_features(&buildings(), Some("class"), Some(&numeric_accept));
        let text_features = filter_features(&as_text, Some("class"), Some(&numeric_accept));
        let text_values = filter_features(&buildings(), Some("class"), Some(&text_accept));

        let fids = |fs: &[LabelFeature]| fs.iter().map(|f| f.fid).collect::<Vec<_>>();
        assert_eq!(fids(&same_typed), vec![Some(1)]);
        assert_eq!(fids(&text_features), fids(&same_typed));
        assert_eq!(fids(&text_values), fids(&same_typed));
    }

    #[test]
    fn test_namespaced_field_falls_back_to_last_segment() {
        let filtered = filter_features(&buildings(), Some("properties/class"), Some(&[2.into()]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(resolve_field(&buildings(), "a/b/class").as_deref(), Some("class"));
    }

    #[test]
    fn test_missing_field_keeps_everything() {
        let features = buildings();
        assert!(matches!(
            try_filter_features(&features, "use", &[1.into()]),
            Err(PrepError::MissingField(_))
        ));
        assert_eq!(filter_features(&features, Some("use"), Some(&[1.into()])), features);
    }

    #[test]
    fn test_output_is_independent_copy() {
        let features = buildings();
        let mut filtered = filter_features(&features, Some("class"), Some(&[1.into()]));
        filtered[0].attributes.insert("class".into(), 99.into());
        assert_eq!(features[0].attributes["class"], AttributeValue::Integer(1));
    }

    #[test]
    fn test_normalized_values() {
        assert_eq!(AttributeValue::from("4.0").normalized(), "4");
        assert_eq!(AttributeValue::from(" 7 ").normalized(), "7");
        assert_eq!(AttributeValue::from("roof").normalized(), "roof");
        assert!(AttributeValue::Integer(3).matches(&AttributeValue::from("3")));
        assert!(!AttributeValue::Integer(3).matches(&AttributeValue::from("3.5")));
    }
}
