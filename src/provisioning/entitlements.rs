use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use super::models::ResourceQuota;

const DEFAULT_QUOTA: ResourceQuota = ResourceQuota {
    number_count: 1,
    max_concurrent_sessions: 1,
};

/// key: entitlements -> plan id to resource quota
///
/// Lookups are pure and never fail; unknown plans resolve to the default quota.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: HashMap<String, ResourceQuota>,
    default: ResourceQuota,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PlanCatalog {
    pub fn builtin() -> Self {
        let plans = [
            ("starter", 1, 2),
            ("growth", 2, 5),
            ("scale", 5, 10),
            ("enterprise", 10, 25),
        ]
        .into_iter()
        .map(|(plan, number_count, max_concurrent_sessions)| {
            (
                plan.to_string(),
                ResourceQuota {
                    number_count,
                    max_concurrent_sessions,
                },
            )
        })
        .collect();
        Self {
            plans,
            default: DEFAULT_QUOTA,
        }
    }

    /// Layers `{"plan_id": {"number_count": n, "max_concurrent_sessions": m}}`
    /// over the built-in table. A `"default"` key replaces the fallback quota.
    pub fn with_overrides(mut self, overrides: &Value) -> Self {
        let Some(entries) = overrides.as_object() else {
            if !overrides.is_null() {
                warn!("plan quota overrides must be a JSON object; ignoring");
            }
            return self;
        };
        for (plan_id, raw) in entries {
            match serde_json::from_value::<ResourceQuota>(raw.clone()) {
                Ok(quota) if normalize(plan_id) == "default" => self.default = quota,
                Ok(quota) => {
                    self.plans.insert(normalize(plan_id), quota);
                }
                Err(err) => warn!(%plan_id, ?err, "skipping malformed plan quota override"),
            }
        }
        self
    }

    pub fn insert(&mut self, plan_id: &str, quota: ResourceQuota) {
        self.plans.insert(normalize(plan_id), quota);
    }

    pub fn quota_for(&self, plan_id: &str) -> ResourceQuota {
        self.plans
            .get(&normalize(plan_id))
            .copied()
            .unwrap_or(self.default)
    }

    pub fn default_quota(&self) -> ResourceQuota {
        self.default
    }
}

fn normalize(plan_id: &str) -> String {
    plan_id.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_plans_resolve() {
        let catalog = PlanCatalog::builtin();
        assert_eq!(catalog.quota_for("growth").number_count, 2);
        assert_eq!(catalog.quota_for(" Scale ").max_concurrent_sessions, 10);
    }

    #[test]
    fn unknown_plan_falls_back_to_default() {
        let catalog = PlanCatalog::builtin();
        assert_eq!(catalog.quota_for("price_legacy_123"), DEFAULT_QUOTA);
        assert_eq!(catalog.quota_for(""), DEFAULT_QUOTA);
    }

    #[test]
    fn overrides_extend_and_replace_plans() {
        let catalog = PlanCatalog::builtin().with_overrides(&json!({
            "price_pro_monthly": {"number_count": 3, "max_concurrent_sessions": 8},
            "starter": {"number_count": 2, "max_concurrent_sessions": 2},
            "default": {"number_count": 0, "max_concurrent_sessions": 1},
            "broken": {"number_count": "many"},
        }));
        assert_eq!(catalog.quota_for("PRICE_PRO_MONTHLY").number_count, 3);
        assert_eq!(catalog.quota_for("starter").number_count, 2);
        assert_eq!(catalog.quota_for("broken").number_count, 0);
        assert_eq!(catalog.default_quota().number_count, 0);
    }
}
