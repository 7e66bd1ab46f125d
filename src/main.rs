mod auth;
mod config;
mod coordinator;
mod error;
mod keygen;
mod kv;
mod middleware;
mod models;
mod mpc;
mod routes;
mod shamir;
mod store;
mod threshold;
mod utils;
mod webauthn;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::AuthService;
use crate::config::{Config, KvBackendKind};
use crate::keygen::Keygen;
use crate::kv::mem::InMemoryKv;
use crate::kv::remote_rest::RemoteRestKv;
use crate::kv::tcp::TcpKv;
use crate::kv::KvBackend;
use crate::middleware::rate_limit::RateLimiter;
use crate::mpc::signer::CosignerHandler;
use crate::shamir::{ShamirKeyMaterial, ShamirKeyRing};
use crate::store::{AuthSessionStore, KeyStore, SessionStore};
use crate::threshold::ThresholdSigningService;
use crate::utils::crypto::HmacJwtSigner;
use crate::webauthn::{StaticWebAuthnVerifier, WebAuthnVerifier};

/// Shared application state accessible in all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub threshold: Arc<ThresholdSigningService>,
    pub auth: Arc<AuthService>,
    pub cosigner: Arc<CosignerHandler>,
    pub shamir: Arc<ShamirKeyRing>,
    pub rate_limiter: RateLimiter,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passkey_threshold_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(addr = %config.addr(), "starting passkey threshold coordinator");

    let kv = build_kv_backend(&config).await;

    let shamir_material = ShamirKeyMaterial::from_b64u(
        &config.shamir_p_b64u,
        &config.shamir_e_s_b64u,
        &config.shamir_d_s_b64u,
    )
    .expect("invalid SHAMIR_* configuration");
    let shamir = Arc::new(ShamirKeyRing::new(shamir_material, config.shamir_grace_ttl_secs));

    let master_secret: Option<[u8; 32]> = config
        .master_secret_b64u
        .as_deref()
        .map(|b64u| {
            let bytes = crate::utils::crypto::b64u_decode(b64u)
                .expect("THRESHOLD_ED25519_MASTER_SECRET_B64U must be valid base64url");
            let mut out = [0u8; 32];
            out.copy_from_slice(&bytes);
            out
        });

    let key_store = KeyStore::new(kv.clone(), config.keystore_prefix.clone());
    let session_store = SessionStore::new(kv.clone(), config.session_prefix.clone());
    let auth_session_store = AuthSessionStore::new(kv.clone(), config.auth_prefix.clone());

    let keygen = Keygen::new(config.share_mode, key_store, master_secret);

    let shared_secret = crate::utils::crypto::b64u_decode(&config.coordinator_shared_secret_b64u)
        .expect("THRESHOLD_COORDINATOR_SHARED_SECRET_B64U must be valid base64url");

    let webauthn: Arc<dyn WebAuthnVerifier> = Arc::new(StaticWebAuthnVerifier);

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
        .expect("failed to build http client");

    let transport = crate::coordinator::transport::CoordinatorTransport::new(
        config.cosigners.clone(),
        config.cosigner_threshold,
        Duration::from_secs(10),
    );

    let threshold = Arc::new(ThresholdSigningService::new(
        session_store,
        auth_session_store,
        keygen.clone_for_threshold(),
        transport,
        webauthn.clone(),
        shared_secret.clone(),
        config.client_participant_id,
        config.relayer_participant_id,
        config.mpc_session_ttl_ms,
        config.signing_session_ttl_ms,
        config.auth_session_ttl_ms,
        config.auth_session_max_uses,
    ));

    let jwt_signer: Arc<dyn crate::utils::crypto::JwtSigner> =
        Arc::new(HmacJwtSigner::new(config.jwt_secret.clone().into_bytes()));

    let auth = Arc::new(
        AuthService::new(&config, http_client.clone(), webauthn, jwt_signer, shamir.clone())
            .expect("failed to construct AuthService"),
    );

    let cosigner = Arc::new(CosignerHandler::new(
        config.relayer_participant_id.to_string(),
        keygen.clone_for_threshold(),
        shared_secret,
        config.client_participant_id,
        config.relayer_participant_id,
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        threshold,
        auth,
        cosigner,
        shamir,
        rate_limiter: RateLimiter::new(kv, config.rate_limit_signing_per_min, 60),
    };

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods(Any)
        .allow_headers(Any);

    let metrics_handle = setup_metrics();

    let app = Router::new()
        .merge(routes::router())
        .route(
            "/metrics",
            axum::routing::get(move || async move { metrics_handle.render() }),
        )
        .layer(middleware::security::SecurityHeadersLayer)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .expect("failed to bind");

    tracing::info!(addr = %config.addr(), "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");
}

async fn build_kv_backend(config: &Config) -> Arc<dyn KvBackend> {
    match &config.kv_backend {
        KvBackendKind::InMemory => Arc::new(InMemoryKv::new()),
        KvBackendKind::RemoteRest { url, token } => {
            Arc::new(RemoteRestKv::new(url.clone(), token.clone()))
        }
        KvBackendKind::Tcp { url } => Arc::new(TcpKv::connect(url).await),
    }
}

fn setup_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder().expect("Failed to install Prometheus recorder");
    handle
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
