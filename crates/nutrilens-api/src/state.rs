use std::sync::Arc;

use nutrilens_db::Database;
use nutrilens_gateway::AiGateway;
use nutrilens_storage::ObjectStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub storage: Arc<ObjectStore>,
    pub gateway: AiGateway,
    pub jwt_secret: String,
}
