use std::sync::{Arc, PoisonError, RwLock};

use pilot_lib::{RouteTable, Settings};
use tokio::sync::Notify;

use crate::daemon::automation::AutomationRegistry;
use crate::daemon::credentials::CredentialSource;
use crate::daemon::internal_state::store::TaskStore;
use crate::daemon::internal_state::SharedState;
use crate::daemon::pool::ResourcePool;

/// The proxy's route table. It's read on every new connection and replaced as a whole.
pub type SharedRoutes = Arc<RwLock<RouteTable>>;

pub fn read_routes(routes: &SharedRoutes) -> RouteTable {
    routes.read().unwrap_or_else(PoisonError::into_inner).clone()
}

pub fn replace_routes(routes: &SharedRoutes, table: RouteTable) {
    *routes.write().unwrap_or_else(PoisonError::into_inner) = table;
}

/// Everything a runner or a message handler needs to do its work.
///
/// All members are shared, so cloning the context is cheap.
#[derive(Clone)]
pub struct Context {
    pub settings: Settings,
    pub state: SharedState,
    pub store: TaskStore,
    pub pool: ResourcePool,
    pub credentials: Arc<dyn CredentialSource>,
    pub automations: Arc<AutomationRegistry>,
    pub routes: SharedRoutes,
    /// Notified once the daemon should shut down.
    pub shutdown: Arc<Notify>,
}
