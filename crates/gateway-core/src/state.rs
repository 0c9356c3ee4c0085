use std::sync::Arc;

use arc_swap::ArcSwap;
use gateway_accounting::Accounting;
use gateway_catalog::Catalog;
use gateway_common::{Environment, GlobalConfig};
use gateway_gate::Gate;
use gateway_provider_core::ProviderRegistry;
use gateway_router::Router as DispatchRouter;
use gateway_storage::SeaOrmStorage;

/// Everything a handler needs, constructed once at bootstrap. `global` is
/// swappable (admin config edits take effect without a restart); everything
/// else, including the deployment environment and the credential-keyed
/// services built from it, is rebuilt only by restarting the process,
/// matching the "no package-level globals, one App value" design note.
pub struct AppState {
    pub global: ArcSwap<GlobalConfig>,
    pub deployment_environment: Environment,
    pub storage: Arc<SeaOrmStorage>,
    pub gate: Gate,
    pub router: DispatchRouter,
    pub accounting: Accounting,
    pub catalog: Arc<Catalog>,
    pub registry: Arc<ProviderRegistry>,
}
