//! # Server
//!
//! Application state, router assembly and the serve loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::agent::{AgentGateway, HttpAgentGateway};
use crate::auth::{operator_auth_middleware, user_auth_middleware};
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::instagram::{InstagramApi, InstagramClient};
use crate::pipeline::MessagePipeline;
use crate::repositories::{AutomationRepository, IntegrationRepository, MessageRepository};
use crate::telemetry::trace_id_middleware;
use crate::token_refresh::TokenRefreshService;

/// Shared resources handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub crypto_key: CryptoKey,
    pub instagram: Arc<dyn InstagramApi>,
    pub agent: Arc<dyn AgentGateway>,
    pub token_refresh_service: Arc<TokenRefreshService>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        crypto_key: CryptoKey,
        instagram: Arc<dyn InstagramApi>,
        agent: Arc<dyn AgentGateway>,
    ) -> Self {
        let integrations = IntegrationRepository::new(Arc::new(db.clone()), crypto_key.clone());
        let token_refresh_service = Arc::new(TokenRefreshService::new(
            config.token_refresh.clone(),
            integrations,
            Arc::clone(&instagram),
        ));

        Self {
            config,
            db,
            crypto_key,
            instagram,
            agent,
            token_refresh_service,
        }
    }

    /// Builds state with the HTTP Instagram client and agent gateway from `config`.
    pub fn from_config(config: Arc<AppConfig>, db: DatabaseConnection) -> Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("crypto key not present in configuration")?;
        let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

        let instagram: Arc<dyn InstagramApi> =
            Arc::new(InstagramClient::new(config.instagram.clone()));
        let agent: Arc<dyn AgentGateway> = Arc::new(HttpAgentGateway::new(
            config.agent_endpoint.clone(),
            config.agent_token.clone(),
        ));

        Ok(Self::new(config, db, crypto_key, instagram, agent))
    }

    pub fn integration_repo(&self) -> IntegrationRepository {
        IntegrationRepository::new(Arc::new(self.db.clone()), self.crypto_key.clone())
    }

    pub fn automation_repo(&self) -> AutomationRepository {
        AutomationRepository::new(Arc::new(self.db.clone()))
    }

    pub fn message_repo(&self) -> MessageRepository {
        MessageRepository::new(Arc::new(self.db.clone()))
    }

    pub fn pipeline(&self) -> MessagePipeline {
        MessagePipeline::new(
            self.integration_repo(),
            self.automation_repo(),
            self.message_repo(),
            Arc::clone(&self.agent),
            Arc::clone(&self.instagram),
        )
    }
}

/// Creates the application router
pub fn create_app(state: AppState) -> Router {
    let user_routes = Router::new()
        .route(
            "/integrations",
            get(handlers::integrations::list_integrations)
                .post(handlers::integrations::create_integration),
        )
        .route(
            "/integrations/{id}",
            delete(handlers::integrations::delete_integration),
        )
        .route(
            "/integrations/instagram/refresh/{id}",
            post(handlers::integrations::refresh_integration),
        )
        .route(
            "/integrations/instagram/oauth/exchange",
            post(handlers::oauth::exchange_code),
        )
        .route(
            "/automations",
            get(handlers::automations::list_automations)
                .post(handlers::automations::create_automation),
        )
        .route(
            "/automations/{id}",
            patch(handlers::automations::update_automation)
                .delete(handlers::automations::delete_automation),
        )
        .route(
            "/automations/{id}/messages",
            get(handlers::messages::list_messages),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            user_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/integrations/sanitize-tokens",
            post(handlers::admin::sanitize_tokens),
        )
        .route(
            "/admin/token-refresh/run",
            post(handlers::admin::run_token_refresh),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            operator_auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/webhooks/instagram",
            get(handlers::webhooks::verify_subscription)
                .post(handlers::webhooks::receive_webhook),
        )
        .merge(user_routes)
        .merge(admin_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id_middleware))
}

/// Serves the API until Ctrl-C, running the token refresh loop alongside when enabled.
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> Result<()> {
    let addr = config.bind_addr().context("invalid server address")?;
    let config = Arc::new(config);
    let state = AppState::from_config(Arc::clone(&config), db)?;

    let shutdown = CancellationToken::new();
    let refresh_task = if config.token_refresh.enabled {
        let service = Arc::clone(&state.token_refresh_service);
        let token = shutdown.clone();
        Some(tokio::spawn(async move { service.run(token).await }))
    } else {
        tracing::info!("Token refresh loop disabled");
        None
    };

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Some(task) = refresh_task
        && let Err(err) = task.await
    {
        tracing::warn!(error = ?err, "Token refresh task ended abnormally");
    }

    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::webhooks::verify_subscription,
        crate::handlers::webhooks::receive_webhook,
        crate::handlers::integrations::list_integrations,
        crate::handlers::integrations::create_integration,
        crate::handlers::integrations::delete_integration,
        crate::handlers::integrations::refresh_integration,
        crate::handlers::oauth::exchange_code,
        crate::handlers::automations::list_automations,
        crate::handlers::automations::create_automation,
        crate::handlers::automations::update_automation,
        crate::handlers::automations::delete_automation,
        crate::handlers::messages::list_messages,
        crate::handlers::admin::sanitize_tokens,
        crate::handlers::admin::run_token_refresh,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::webhooks::WebhookAck,
            crate::handlers::integrations::IntegrationResponse,
            crate::handlers::integrations::CreateIntegrationRequest,
            crate::handlers::integrations::RefreshResponse,
            crate::handlers::oauth::ExchangeCodeRequest,
            crate::handlers::automations::AutomationResponse,
            crate::handlers::automations::CreateAutomationRequest,
            crate::handlers::automations::UpdateAutomationRequest,
            crate::handlers::messages::MessageResponse,
            crate::models::message::MessageDirection,
            crate::pipeline::WebhookSummary,
            crate::token_refresh::RefreshSummary,
            crate::admin::SanitizeSummary,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Barid API",
        description = "Instagram DM automation backend",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
