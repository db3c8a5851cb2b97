pub(crate) const API_V1_ASSETS: &str = "/api/v1/assets/";
pub(crate) const API_V1_STATUS: &str = "/api/v1/status";
pub(crate) const API_V1_BUCKETS: &str = "/api/v1/buckets";
pub(crate) const API_HEALTH: &str = "/health";
pub(crate) const API_METRICS: &str = "/metrics";
