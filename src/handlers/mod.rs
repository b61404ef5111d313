// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! HTTP surface: token exchange (C15), the external-authz hook (C15), the
//! JWKS publisher (C16), and, when clustering is enabled, the cross-node
//! cache RPC endpoint (§6).
//!
//! [`build_rocket`] wires every already-constructed capability (trust
//! store, token service, issuer registry, key managers, data-source
//! registry) into one [`rocket::Rocket<rocket::Build>`], following the same
//! Figment-merge shape the daemon's web server launcher uses for
//! address/port/TLS.

mod external_authz;
mod jwks;
mod token_exchange;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use log::{info, warn};
use rocket::{Build, Rocket};
use rocket_cors::{AllowedHeaders, AllowedOrigins, CorsOptions};

use crate::claims_mapping::{ClaimExpression, ClaimsFilter, ExpressionClaimMapper};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ExternalAuthzConfig};
use crate::credential::DataSourceInput;
use crate::datasource::{
    DataSourceLookup, DataSourceRegistry, HttpPeerClient, PeerClient, PeerId, StaticDataSource,
};
use crate::error::ParsecError;
use crate::issuers::{IssuerRegistry, SigningTransactionTokenIssuer, UnsignedTokenIssuer};
use crate::keys::{InMemoryKeySlotStore, RotatingKeyManager, RsaKeyProvider};
use crate::token_service::TokenService;
use crate::validators::{ActorPolicy, JsonValidator, JwtValidator, TrustStore};

/// Request-scoped capabilities every handler reaches through Rocket's state
/// management, built once at startup (§4.6, §4.7).
pub struct AppState {
    pub trust_store: Arc<TrustStore>,
    pub token_service: Arc<TokenService>,
    pub issuers: Arc<IssuerRegistry>,
    pub trust_domain: String,
    pub external_authz: ExternalAuthzConfig,
    pub data_source_registry: Option<Arc<DataSourceRegistry>>,
}

/// Builds the trust store from configuration: one validator entry per
/// configured JWT/JSON validator, registered under every credential type it
/// accepts, plus the optional actor-acting-as-actor policy (§4.1).
fn build_trust_store(config: &Config, clock: Arc<dyn Clock>) -> Result<TrustStore> {
    let mut store = match &config.trust_store.actor_policy_expression {
        Some(expression) => TrustStore::with_policy(ActorPolicy::new(expression.clone())),
        None => TrustStore::new(),
    };

    for validator_config in &config.trust_store.jwt_validators {
        let mut validator = JwtValidator::new(
            validator_config.name.clone(),
            validator_config.issuer.clone(),
            validator_config.jwks_url.clone(),
            config.trust_domain.clone(),
            clock.clone(),
        );
        if let Some(seconds) = validator_config.refresh_interval_seconds {
            validator = validator.with_refresh_interval(StdDuration::from_secs(seconds));
        }
        let validator = Arc::new(validator);
        for credential_type in validator.credential_types() {
            store.register(*credential_type, validator_config.issuer.clone(), validator.clone());
        }
    }

    for validator_config in &config.trust_store.json_validators {
        let validator = Arc::new(
            JsonValidator::new(validator_config.name.clone())
                .with_expected_trust_domain(config.trust_domain.clone())
                .with_claims_filter(ClaimsFilter::allow(validator_config.allowed_claims.clone())),
        );
        for credential_type in validator.credential_types() {
            store.register(*credential_type, validator_config.name.clone(), validator.clone());
        }
    }

    Ok(store)
}

/// Builds the data-source registry, registering every configured static
/// source and enabling cluster routing when `config.datasources.cluster` is
/// set (§4.3).
fn build_data_source_registry(config: &Config, clock: Arc<dyn Clock>) -> Result<DataSourceRegistry> {
    let mut registry = DataSourceRegistry::new(clock).with_capacity_bytes(config.datasources.capacity_bytes);

    for source_config in &config.datasources.static_sources {
        let source = StaticDataSource::new(source_config.name.clone(), source_config.payload.clone())
            .map_err(|e| anyhow::anyhow!("invalid static data source '{}': {e}", source_config.name))?
            .with_cache_ttl(chrono::Duration::seconds(source_config.cache_ttl_seconds));
        registry
            .register(Arc::new(source))
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    if let Some(cluster) = &config.datasources.cluster {
        let self_id = PeerId(cluster.self_id.clone());
        let peer_ids: Vec<PeerId> = cluster.peers.iter().map(|p| PeerId(p.id.clone())).collect();
        let peer_urls: HashMap<PeerId, String> = cluster
            .peers
            .iter()
            .map(|p| (PeerId(p.id.clone()), p.base_url.clone()))
            .collect();
        let peer_client: Arc<dyn PeerClient> = Arc::new(
            HttpPeerClient::new(peer_urls).with_timeout(StdDuration::from_secs(cluster.peer_timeout_seconds)),
        );
        registry = registry.with_cluster(self_id, peer_ids, peer_client);
    }

    Ok(registry)
}

/// Spawns one [`RotatingKeyManager`] per configured key manager, builds the
/// corresponding signing issuer, and starts its periodic rotation-check
/// loop (§4.4). The manager has no run loop of its own — the interval is
/// driven here, matching the configured `check_interval_seconds`.
async fn build_key_managers(
    config: &Config,
    clock: Arc<dyn Clock>,
    issuers: &mut IssuerRegistry,
) -> Result<()> {
    for key_manager_config in &config.key_managers {
        let slot_store = Arc::new(InMemoryKeySlotStore::new());
        let key_provider = Arc::new(RsaKeyProvider::new());
        let params = key_manager_config
            .rotation_params()
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let manager = Arc::new(
            RotatingKeyManager::new(
                key_manager_config.token_type.clone(),
                config.trust_domain.clone(),
                key_manager_config.algorithm,
                params,
                slot_store,
                key_provider,
                clock.clone(),
            )
            .await
            .map_err(|e| anyhow::anyhow!("failed to start key manager for '{}': {e}", key_manager_config.token_type))?,
        );

        issuers
            .register(Arc::new(SigningTransactionTokenIssuer::new(manager.clone(), clock.clone())))
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let check_interval = StdDuration::from_secs(key_manager_config.check_interval_seconds.max(1) as u64);
        let token_type = key_manager_config.token_type.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.check_rotation_once().await {
                    warn!("rotation check failed for key manager '{token_type}': {e}");
                }
            }
        });
    }
    Ok(())
}

/// Builds the `tctx`/`req_ctx` mapper chains and the per-token-type
/// request-context filter map from the claim-mapping configuration (§4.2).
fn build_claim_mapping(
    config: &Config,
) -> (Vec<Arc<dyn crate::claims_mapping::ClaimMapper>>, Vec<Arc<dyn crate::claims_mapping::ClaimMapper>>, HashMap<String, ClaimsFilter>) {
    let tctx_expressions: Vec<ClaimExpression> =
        config.claim_mapping.transaction_context.iter().map(Into::into).collect();
    let req_ctx_expressions: Vec<ClaimExpression> =
        config.claim_mapping.request_context.iter().map(Into::into).collect();

    let tctx_mappers: Vec<Arc<dyn crate::claims_mapping::ClaimMapper>> = if tctx_expressions.is_empty() {
        Vec::new()
    } else {
        vec![Arc::new(ExpressionClaimMapper::new(tctx_expressions))]
    };
    let req_ctx_mappers: Vec<Arc<dyn crate::claims_mapping::ClaimMapper>> = if req_ctx_expressions.is_empty() {
        Vec::new()
    } else {
        vec![Arc::new(ExpressionClaimMapper::new(req_ctx_expressions))]
    };

    let req_ctx_filters = config
        .claim_mapping
        .request_context_filters
        .iter()
        .map(|entry| (entry.token_type.clone(), ClaimsFilter::from(&entry.filter)))
        .collect();

    (tctx_mappers, req_ctx_mappers, req_ctx_filters)
}

/// Builds the whole service: every capability, the Rocket figment (address,
/// port, optional TLS per the daemon's Figment-merge pattern), CORS, and the
/// route mounts (§6).
pub async fn build_rocket(config: Config) -> Result<Rocket<Build>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let data_source_registry = Arc::new(build_data_source_registry(&config, clock.clone())?);

    let mut issuers = IssuerRegistry::new();
    build_key_managers(&config, clock.clone(), &mut issuers).await?;
    for token_type in &config.unsigned_token_types {
        issuers
            .register(Arc::new(UnsignedTokenIssuer::new(token_type.clone(), clock.clone())))
            .map_err(|e| anyhow::anyhow!("failed to register unsigned issuer for '{token_type}': {e}"))?;
    }
    let issuers = Arc::new(issuers);

    let trust_store = Arc::new(build_trust_store(&config, clock.clone())?);

    let (tctx_mappers, req_ctx_mappers, req_ctx_filters) = build_claim_mapping(&config);
    let data_source_lookup: Arc<dyn DataSourceLookup> = data_source_registry.clone();
    let token_service = Arc::new(TokenService::new(
        data_source_lookup,
        tctx_mappers,
        req_ctx_mappers,
        req_ctx_filters,
        issuers.clone(),
        config.trust_domain.clone(),
    ));

    let cluster_enabled = config.datasources.cluster.is_some();

    let app_state = AppState {
        trust_store,
        token_service,
        issuers,
        trust_domain: config.trust_domain.clone(),
        external_authz: config.external_authz.clone(),
        data_source_registry: if cluster_enabled { Some(data_source_registry.clone()) } else { None },
    };

    let mut figment = rocket::Config::figment()
        .merge(("ident", config.server.name.clone()))
        .merge(("address", config.server.address.clone()))
        .merge(("port", config.server.port));

    if let (Some(cert), Some(key)) = (&config.server.cert, &config.server.key) {
        info!("TLS certificate and key configured, enabling TLS for {}:{}", config.server.address, config.server.port);
        let cert_data = BASE64_STANDARD.decode(cert).context("server.cert is not valid base64")?;
        let key_data = BASE64_STANDARD.decode(key).context("server.key is not valid base64")?;
        figment = figment.merge(("tls.certs", cert_data)).merge(("tls.key", key_data));
    }

    let cors = CorsOptions {
        allowed_origins: AllowedOrigins::all(),
        allowed_headers: AllowedHeaders::all(),
        allow_credentials: true,
        ..Default::default()
    }
    .to_cors()
    .context("failed to build CORS fairing")?;

    let mut rocket = rocket::custom(figment)
        .manage(app_state)
        .attach(cors)
        .mount(
            "/",
            rocket::routes![
                token_exchange::exchange_token,
                external_authz::check,
                jwks::jwks,
                jwks::jwks_well_known,
            ],
        );

    if cluster_enabled {
        info!("cluster mode enabled, mounting {} fetch endpoint", crate::datasource::CLUSTER_PATH_PREFIX);
        rocket = rocket.mount(
            crate::datasource::CLUSTER_PATH_PREFIX,
            rocket::routes![cluster_fetch],
        );
    }

    Ok(rocket)
}

/// Serves one `/_groupcache/fetch` request on behalf of a peer (§4.3, §6).
/// Only meaningful when cluster mode is enabled — unmounted otherwise.
#[rocket::post("/fetch", data = "<request>", format = "json")]
async fn cluster_fetch(
    request: rocket::serde::json::Json<crate::datasource::ClusterFetchRequest>,
    state: &rocket::State<AppState>,
) -> Result<rocket::serde::json::Json<crate::datasource::ClusterCacheEntry>, rocket::http::Status> {
    let Some(registry) = &state.data_source_registry else {
        return Err(rocket::http::Status::NotFound);
    };

    let request = request.into_inner();
    let input = DataSourceInput {
        subject: &request.subject,
        actor: request.actor.as_ref(),
        request_attributes: &request.request_attributes,
    };

    match registry.fetch_for_peer(&request.source_name, input).await {
        Some(data) => Ok(rocket::serde::json::Json(crate::datasource::ClusterCacheEntry { data })),
        None => Err(rocket::http::Status::NotFound),
    }
}

/// Maps a [`ParsecError`] to an HTTP status for the cluster RPC path and
/// any other internal-only surface that doesn't speak OAuth error codes.
pub(crate) fn internal_status(err: &ParsecError) -> rocket::http::Status {
    if err.is_authentication_failure() {
        rocket::http::Status::Unauthorized
    } else {
        rocket::http::Status::InternalServerError
    }
}
