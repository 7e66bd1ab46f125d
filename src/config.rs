use std::env;
use std::net::SocketAddr;

/// Which role this process plays in the threshold-signing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Coordinator,
    Cosigner,
}

/// How relayer key material is obtained for a given `relayerKeyId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    Kv,
    Derived,
    Auto,
}

/// Which KV backend persists sessions/keys.
#[derive(Debug, Clone)]
pub enum KvBackendKind {
    InMemory,
    RemoteRest { url: String, token: String },
    Tcp { url: String },
}

#[derive(Debug, Clone)]
pub struct CosignerEndpoint {
    pub cosigner_id: String,
    pub relayer_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Relayer / chain
    pub relayer_account_id: String,
    pub relayer_private_key: String,
    pub webauthn_contract_id: String,
    pub near_rpc_url: String,
    pub network_id: String,
    pub account_initial_balance: String,
    pub create_account_and_register_gas: String,

    // Shamir
    pub shamir_p_b64u: String,
    pub shamir_e_s_b64u: String,
    pub shamir_d_s_b64u: String,
    pub shamir_grace_ttl_secs: Option<u64>,

    // Threshold
    pub node_role: NodeRole,
    pub share_mode: ShareMode,
    pub master_secret_b64u: Option<String>,
    pub coordinator_shared_secret_b64u: String,
    pub cosigners: Vec<CosignerEndpoint>,
    pub cosigner_threshold: u32,
    pub client_participant_id: u16,
    pub relayer_participant_id: u16,

    // KV backend
    pub kv_backend: KvBackendKind,
    pub keystore_prefix: String,
    pub session_prefix: String,
    pub auth_prefix: String,

    // TTLs
    pub mpc_session_ttl_ms: i64,
    pub signing_session_ttl_ms: i64,
    pub auth_session_ttl_ms: i64,
    pub auth_session_max_uses: u32,

    // Rate limiting
    pub rate_limit_signing_per_min: u32,
    pub rate_limit_register_per_min: u32,

    // JWT
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,

    // CORS
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let node_role = match env("THRESHOLD_NODE_ROLE", "coordinator").as_str() {
            "cosigner" => NodeRole::Cosigner,
            _ => NodeRole::Coordinator,
        };

        let share_mode = match env("THRESHOLD_ED25519_SHARE_MODE", "auto").as_str() {
            "kv" => ShareMode::Kv,
            "derived" => ShareMode::Derived,
            _ => ShareMode::Auto,
        };

        let kv_backend = if let (Some(url), Some(token)) = (
            env_opt("UPSTASH_REDIS_REST_URL"),
            env_opt("UPSTASH_REDIS_REST_TOKEN"),
        ) {
            KvBackendKind::RemoteRest { url, token }
        } else if let Some(url) = env_opt("REDIS_URL") {
            KvBackendKind::Tcp { url }
        } else {
            KvBackendKind::InMemory
        };

        let cosigners: Vec<CosignerEndpoint> = env_opt("THRESHOLD_ED25519_RELAYER_COSIGNERS")
            .map(|raw| {
                serde_json::from_str::<Vec<RawCosigner>>(&raw)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|r| CosignerEndpoint {
                        cosigner_id: r.cosigner_id,
                        relayer_url: r.relayer_url,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host: env("HOST", "0.0.0.0"),
            port: env("PORT", "8000").parse().expect("PORT must be a number"),

            relayer_account_id: env("RELAYER_ACCOUNT_ID", ""),
            relayer_private_key: env("RELAYER_PRIVATE_KEY", ""),
            webauthn_contract_id: env("WEBAUTHN_CONTRACT_ID", ""),
            near_rpc_url: env("NEAR_RPC_URL", "https://rpc.testnet.near.org"),
            network_id: env("NETWORK_ID", "testnet"),
            account_initial_balance: env("ACCOUNT_INITIAL_BALANCE", "0"),
            create_account_and_register_gas: env("CREATE_ACCOUNT_AND_REGISTER_GAS", "100"),

            shamir_p_b64u: require_env("SHAMIR_P_B64U"),
            shamir_e_s_b64u: require_env("SHAMIR_E_S_B64U"),
            shamir_d_s_b64u: require_env("SHAMIR_D_S_B64U"),
            shamir_grace_ttl_secs: env_opt("SHAMIR_GRACE_TTL_SECS").and_then(|s| s.parse().ok()),

            node_role,
            share_mode,
            master_secret_b64u: env_opt("THRESHOLD_ED25519_MASTER_SECRET_B64U"),
            coordinator_shared_secret_b64u: require_env(
                "THRESHOLD_COORDINATOR_SHARED_SECRET_B64U",
            ),
            cosigners,
            cosigner_threshold: env("THRESHOLD_ED25519_RELAYER_COSIGNER_T", "1")
                .parse()
                .unwrap_or(1),
            client_participant_id: env("THRESHOLD_ED25519_CLIENT_PARTICIPANT_ID", "1")
                .parse()
                .unwrap_or(1),
            relayer_participant_id: env("THRESHOLD_ED25519_RELAYER_PARTICIPANT_ID", "2")
                .parse()
                .unwrap_or(2),

            kv_backend,
            keystore_prefix: env(
                "THRESHOLD_ED25519_KEYSTORE_PREFIX",
                "threshold-ed25519:key:",
            ),
            session_prefix: env(
                "THRESHOLD_ED25519_SESSION_PREFIX",
                "threshold-ed25519:session:",
            ),
            auth_prefix: env("THRESHOLD_ED25519_AUTH_PREFIX", "threshold-ed25519:auth:"),

            mpc_session_ttl_ms: env("MPC_SESSION_TTL_MS", "60000").parse().unwrap_or(60_000),
            signing_session_ttl_ms: env("SIGNING_SESSION_TTL_MS", "60000")
                .parse()
                .unwrap_or(60_000),
            auth_session_ttl_ms: env("AUTH_SESSION_TTL_MS", "300000")
                .parse()
                .unwrap_or(300_000),
            auth_session_max_uses: env("AUTH_SESSION_MAX_USES", "5").parse().unwrap_or(5),

            rate_limit_signing_per_min: env("RATE_LIMIT_SIGNING", "30").parse().unwrap_or(30),
            rate_limit_register_per_min: env("RATE_LIMIT_REGISTER", "10").parse().unwrap_or(10),

            jwt_secret: require_env("SECRET_KEY"),
            jwt_expiry_hours: env("JWT_EXPIRY_HOURS", "24").parse().unwrap_or(24),

            cors_origins: env("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid address")
    }
}

#[derive(serde::Deserialize)]
struct RawCosigner {
    #[serde(rename = "cosignerId")]
    cosigner_id: String,
    #[serde(rename = "relayerUrl")]
    relayer_url: String,
}

fn env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn require_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
