//! View State
//!
//! Everything one knowledge-base view needs, wired from the configuration:
//! one lifecycle manager shared by the navigation cache, the analysis flows
//! and the search sessions.

use std::sync::Arc;

use tracing::info;
use wiki_lens_llm::{build_http_client, AnalysisTransport, HttpAnalysisTransport};

use crate::models::settings::AppConfig;
use crate::services::analysis::{AnalysisDeps, AnalysisOptions, AnalysisService};
use crate::services::backend::{
    CloudExporter, DocumentSource, HttpWikiBackend, SearchTransport, TreeSource,
};
use crate::services::navigation_cache::NavigationCache;
use crate::services::request_lifecycle::RequestLifecycleManager;
use crate::services::search_session::{SearchOptions, SearchSessionManager};
use crate::services::tree_batch::TreeBatchPlanner;
use crate::utils::error::AppResult;

/// Collaborators a view talks to. Tests substitute in-memory fakes.
#[derive(Clone)]
pub struct Collaborators {
    pub tree: Arc<dyn TreeSource>,
    pub documents: Arc<dyn DocumentSource>,
    pub search: Arc<dyn SearchTransport>,
    pub exporter: Arc<dyn CloudExporter>,
    pub analysis: Arc<dyn AnalysisTransport>,
}

/// Services of one knowledge-base view.
pub struct SpaceViewState {
    lifecycle: Arc<RequestLifecycleManager>,
    cache: NavigationCache,
    analysis: AnalysisService,
    search: SearchSessionManager,
}

impl SpaceViewState {
    /// Wire the HTTP collaborators described by `config`.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = build_http_client(config.proxy.as_ref(), config.request_timeout())?;
        let backend = Arc::new(HttpWikiBackend::new(
            client.clone(),
            &config.backend_url,
            config.access_token.clone(),
            config.request_timeout(),
            config.retry_policy(),
        )?);
        let transport = HttpAnalysisTransport::new(
            client,
            &config.backend_url,
            config.request_timeout(),
        )?
        .with_access_token(config.access_token.clone());

        info!(backend = %config.backend_url, "view state wired");
        Ok(Self::with_collaborators(
            config,
            Collaborators {
                tree: backend.clone(),
                documents: backend.clone(),
                search: backend.clone(),
                exporter: backend,
                analysis: Arc::new(transport),
            },
        ))
    }

    /// Wire the given collaborators with the settings from `config`.
    pub fn with_collaborators(config: &AppConfig, collaborators: Collaborators) -> Self {
        let lifecycle = Arc::new(RequestLifecycleManager::new());
        let idle = config.stream_idle_timeout();

        let cache = NavigationCache::builder(collaborators.tree, lifecycle.clone())
            .ttl(config.cache_ttl())
            .retry(config.retry_policy())
            .idle_timeout(idle)
            .build();

        let analysis = AnalysisService::new(
            AnalysisDeps {
                cache: cache.clone(),
                documents: collaborators.documents,
                exporter: collaborators.exporter,
                transport: collaborators.analysis,
                lifecycle: lifecycle.clone(),
            },
            AnalysisOptions {
                model: config.model_settings(),
                prompts: config.prompts.clone(),
                planner: TreeBatchPlanner::new(
                    config.analysis.batch_threshold,
                    config.analysis.batch_size,
                ),
                idle_timeout: Some(idle),
            },
        );

        let search = SearchSessionManager::new(
            collaborators.search,
            lifecycle.clone(),
            SearchOptions {
                page_size: config.effective_page_size(),
                idle_timeout: Some(idle),
            },
        );

        Self {
            lifecycle,
            cache,
            analysis,
            search,
        }
    }

    pub fn lifecycle(&self) -> &Arc<RequestLifecycleManager> {
        &self.lifecycle
    }

    pub fn navigation(&self) -> &NavigationCache {
        &self.cache
    }

    pub fn analysis(&self) -> &AnalysisService {
        &self.analysis
    }

    pub fn search(&self) -> &SearchSessionManager {
        &self.search
    }

    /// Stop everything the view started. Returns the number of requests
    /// that were still live.
    pub fn teardown(&self) -> usize {
        let cancelled = self.lifecycle.shutdown();
        self.cache.teardown();
        self.search.cancel_all();
        info!(cancelled, "view torn down");
        cancelled
    }
}
