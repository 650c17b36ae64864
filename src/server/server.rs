use crate::application_impl::{
    Argon2PasswordHasher, JwtConfig, JwtTokenService, RealAuthService, RpcUserDirectory,
};
use crate::application_port::{AuthService, CredentialHasher, TokenService};
use crate::broker::{
    BrokerConnection, KafkaConnection, KafkaTopicConsumer, MessageHandler, RequestResponder,
    RpcClient, RpcResponseHandler, SendOptions, TopicConsumer,
};
use crate::domain_port::{RefreshTokenRepo, RevocationStore, UserDirectory};
use crate::infra_mysql::MySqlRefreshTokenRepo;
use crate::infra_redis::RedisRevocationStore;
use crate::logger::*;
use crate::server::auth_handlers;
use crate::settings::Settings;
use nanoid::nanoid;
use sqlx::{MySql, Pool};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct Server {
    pub auth_service: Arc<dyn AuthService>,
    pub token_service: Arc<dyn TokenService>,
    pub rpc: Arc<RpcClient>,
    connection: Arc<dyn BrokerConnection>,
    response_handle: Mutex<Option<JoinHandle<()>>>,
    responder_handle: Mutex<Option<JoinHandle<()>>>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    pool: Pool<MySql>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let alphabet: [char; 16] = [
            '1', '2', '3', '4', '5', '6', '7', '8', '9', '0', 'a', 'b', 'c', 'd', 'e', 'f',
        ];
        let run_id = nanoid!(10, &alphabet);

        let redis_client = redis::Client::open(settings.cache.url.as_str())?;
        let redis_manager = redis_client.get_connection_manager().await?;
        let revocation_store: Arc<dyn RevocationStore> = Arc::new(RedisRevocationStore::new(
            redis_manager,
            settings.cache.blacklist_prefix.clone(),
        ));

        let pool = Pool::<MySql>::connect(&settings.mysql.dsn).await?;
        let refresh_repo: Arc<dyn RefreshTokenRepo> =
            Arc::new(MySqlRefreshTokenRepo::new(pool.clone()));

        let connection: Arc<dyn BrokerConnection> = Arc::new(KafkaConnection::try_new(
            &settings.broker.brokers,
            &format!("{}-{}", settings.broker.client_id, run_id),
        )?);
        if let Err(e) = connection.connect().await {
            // reconnection is lazy, inline with the next send
            warn!(error = %e, "broker not reachable at startup");
        }

        let defaults = SendOptions {
            timeout: Duration::from_millis(settings.rpc.request_timeout_ms),
            max_attempts: settings.rpc.max_attempts,
            retry_delay: Duration::from_millis(settings.rpc.retry_delay_ms),
            correlation_id: None,
        };
        let rpc = Arc::new(RpcClient::new(
            connection.clone(),
            &settings.broker.client_id,
            defaults,
        ));

        let user_directory: Arc<dyn UserDirectory> = Arc::new(RpcUserDirectory::new(rpc.clone()));

        let jwt_cfg = JwtConfig::try_new(
            &settings.jwt.issuer,
            settings.jwt.secret.clone().into_bytes(),
            &settings.jwt.access_expires_in,
            &settings.jwt.refresh_expires_in,
        )?;
        let token_service: Arc<dyn TokenService> = Arc::new(JwtTokenService::new(
            jwt_cfg,
            refresh_repo,
            revocation_store,
        ));
        let credential_hasher: Arc<dyn CredentialHasher> = Arc::new(Argon2PasswordHasher);
        let auth_service: Arc<dyn AuthService> = Arc::new(RealAuthService::new(
            user_directory,
            token_service.clone(),
            credential_hasher,
        ));

        // region runtime infra
        let cancel = CancellationToken::new();

        // replies are demultiplexed per instance, so the consumer group is
        // unique per run
        let reply_topics = rpc.reply_topics();
        let response_consumer: Arc<dyn TopicConsumer> = Arc::new(KafkaTopicConsumer::new(
            &settings.broker.brokers,
            &format!("{}-rpc-{}", settings.broker.client_id, run_id),
            cancel.clone(),
        ));
        let response_handler: Arc<dyn MessageHandler> =
            Arc::new(RpcResponseHandler::new(rpc.clone()));
        let rpc_group = format!("{}-rpc-{}", settings.broker.group_id, run_id);
        let response_handle = tokio::spawn(async move {
            let topics: Vec<&str> = reply_topics.iter().map(String::as_str).collect();
            let _ = response_consumer
                .run(&rpc_group, &topics, response_handler)
                .await;
        });

        let mut responder = RequestResponder::new(connection.clone(), &settings.broker.client_id);
        auth_handlers::register_all(
            &mut responder,
            auth_service.clone(),
            token_service.clone(),
            rpc.clone(),
        );
        let request_patterns = responder.patterns();
        let responder: Arc<dyn MessageHandler> = Arc::new(responder);
        let request_consumer: Arc<dyn TopicConsumer> = Arc::new(KafkaTopicConsumer::new(
            &settings.broker.brokers,
            &format!("{}-srv-{}", settings.broker.client_id, run_id),
            cancel.clone(),
        ));
        let request_group = settings.broker.group_id.clone();
        let responder_handle = tokio::spawn(async move {
            let topics: Vec<&str> = request_patterns.iter().map(String::as_str).collect();
            let _ = request_consumer
                .run(&request_group, &topics, responder)
                .await;
        });

        let cleanup_tokens = token_service.clone();
        let cleanup_cancel = cancel.clone();
        let cleanup_handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
            tick.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    biased;
                    _ = cleanup_cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = cleanup_tokens.cleanup_expired().await {
                            warn!(error = %e, "cleanup pass failed");
                        }
                    }
                }
            }
        });

        // endregion

        info!("server started");

        Ok(Self {
            auth_service,
            token_service,
            rpc,
            connection,
            response_handle: Mutex::new(Some(response_handle)),
            responder_handle: Mutex::new(Some(responder_handle)),
            cleanup_handle: Mutex::new(Some(cleanup_handle)),
            cancel,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.cancel.cancel();

        for slot in [
            &self.cleanup_handle,
            &self.response_handle,
            &self.responder_handle,
        ] {
            let handle = match slot.lock() {
                Ok(mut lock) => lock.take(),
                Err(_) => None,
            };
            if let Some(handle) = handle {
                let r = handle.await;
                info!("background task dropped: {:?}", r);
            }
        }

        self.connection.close().await;
        self.pool.close().await;
    }
}
