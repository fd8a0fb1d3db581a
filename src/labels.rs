use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Turn a snake_case identifier into its display label: underscores become
/// spaces and each word starts with an upper-case letter.
///
/// `trial_to_live_rate_1d` → `Trial To Live Rate 1d`
pub fn display_label(raw: &str) -> String {
    raw.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Two-way mapping between raw identifiers and their display labels.
///
/// Built once over a fixed vocabulary. Construction refuses vocabularies in
/// which two identifiers would render to the same label, so lookups in both
/// directions are always unambiguous.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    raw_to_clean: BTreeMap<String, String>,
    clean_to_raw: BTreeMap<String, String>,
    order: Vec<String>,
}

impl LabelMap {
    pub fn new<I, S>(identifiers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_labels(identifiers.into_iter().map(|raw| {
            let raw = raw.into();
            let clean = display_label(&raw);
            (raw, clean)
        }))
    }

    /// Build from identifiers paired with labels chosen by the caller.
    pub fn with_labels<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = LabelMap::default();
        for (raw, clean) in pairs {
            if map.raw_to_clean.contains_key(&raw) {
                continue;
            }
            if let Some(existing) = map.clean_to_raw.get(&clean) {
                return Err(Error::LabelCollision {
                    label: clean,
                    first: existing.clone(),
                    second: raw,
                });
            }
            map.clean_to_raw.insert(clean.clone(), raw.clone());
            map.raw_to_clean.insert(raw.clone(), clean);
            map.order.push(raw);
        }
        Ok(map)
    }

    pub fn raw_to_clean(&self, raw: &str) -> Option<&str> {
        self.raw_to_clean.get(raw).map(String::as_str)
    }

    pub fn clean_to_raw(&self, clean: &str) -> Option<&str> {
        self.clean_to_raw.get(clean).map(String::as_str)
    }

    /// Display labels in vocabulary order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.order
            .iter()
            .filter_map(|raw| self.raw_to_clean.get(raw).map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_label() {
        assert_eq!(display_label("new_trials"), "New Trials");
        assert_eq!(display_label("retention_30d"), "Retention 30d");
        assert_eq!(display_label("all_users"), "All Users");
        assert_eq!(
            display_label("customer_to_at_least_100_gmv_rate_in_30d"),
            "Customer To At Least 100 Gmv Rate In 30d"
        );
    }

    #[test]
    fn test_round_trip() {
        let vocab = ["retention_30d", "new_trials", "avg_gmv_per_user", "churn_rate"];
        let map = LabelMap::new(vocab).unwrap();
        for raw in vocab {
            let clean = map.raw_to_clean(raw).unwrap();
            assert_eq!(map.clean_to_raw(clean), Some(raw));
        }
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_labels_keep_vocabulary_order() {
        let map = LabelMap::new(["niche", "country", "niche"]).unwrap();
        let labels: Vec<&str> = map.labels().collect();
        assert_eq!(labels, vec!["Niche", "Country"]);
    }

    #[test]
    fn test_collision_rejected() {
        let err = LabelMap::new(["new_trials", "New_trials"]).unwrap_err();
        assert!(matches!(err, Error::LabelCollision { .. }));
    }

    #[test]
    fn test_explicit_labels() {
        let map = LabelMap::with_labels([
            ("ltv_180d".to_string(), "LTV 180d".to_string()),
            ("gmv".to_string(), "Gmv".to_string()),
        ])
        .unwrap();
        assert_eq!(map.clean_to_raw("LTV 180d"), Some("ltv_180d"));
        assert!(map.clean_to_raw("Ltv 180d").is_none());

        let err = LabelMap::with_labels([
            ("a".to_string(), "Same".to_string()),
            ("b".to_string(), "Same".to_string()),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::LabelCollision { .. }));
    }

    #[test]
    fn test_unknown_lookup() {
        let map = LabelMap::new(["gmv"]).unwrap();
        assert!(map.raw_to_clean("leads").is_none());
        assert!(map.clean_to_raw("Leads").is_none());
    }
}
