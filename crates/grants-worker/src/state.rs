use std::sync::Arc;

use grants_core::RedeemEngine;
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub metrics: PrometheusHandle,
    /// Kept on the app state so a caller embedding this service behind its
    /// own HTTP layer has somewhere to reach the engine from; no route
    /// here dispatches to it directly — claim/redeem HTTP routing is out
    /// of scope for this repo.
    pub redeem_engine: Arc<RedeemEngine>,
}
