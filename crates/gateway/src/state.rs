use std::sync::Arc;

use sg_providers::ProviderRegistry;
use sg_skills::{SkillExecutor, SkillRegistry};
use sg_storage::Repository;

use crate::auth::TokenResolver;
use crate::config::Config;
use crate::runtime::SessionManager;

/// Shared application state passed to all API handlers.
///
/// Fields grouped by concern:
/// - **Core services** — config, LLM providers, skills
/// - **Runtime** — session directory (orchestrators, subscribers)
/// - **Persistence** — repository sink
/// - **Security** — bearer-token resolver
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    pub skills: Arc<SkillRegistry>,
    pub skill_executor: Arc<dyn SkillExecutor>,
    pub sessions: Arc<SessionManager>,
    pub repository: Arc<dyn Repository>,
    pub auth: Arc<TokenResolver>,
}
