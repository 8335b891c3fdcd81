use std::net::{SocketAddr, TcpListener as StdTcpListener};

use anyhow::Context;
use axum::Router;
use tokio::runtime::Builder as RuntimeBuilder;
use tokio::signal;
use tower::{service_fn, Service};

use edgecart_core::handler::{BoxHandler, IntoHandler};
use edgecart_core::manifest::ManifestLoader;
use simple_logger::SimpleLogger;

use crate::service::{EdgeCartAxumService, StorefrontServices};

#[derive(Clone, Debug)]
pub struct AxumDevServerConfig {
    pub addr: SocketAddr,
    pub enable_ctrl_c: bool,
}

impl Default for AxumDevServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            enable_ctrl_c: true,
        }
    }
}

/// Blocking local server hosting one storefront handler.
pub struct AxumDevServer {
    service: EdgeCartAxumService,
    config: AxumDevServerConfig,
}

impl AxumDevServer {
    pub fn new(handler: BoxHandler, services: StorefrontServices) -> Self {
        Self::with_config(handler, services, AxumDevServerConfig::default())
    }

    pub fn with_config(
        handler: BoxHandler,
        services: StorefrontServices,
        config: AxumDevServerConfig,
    ) -> Self {
        Self {
            service: EdgeCartAxumService::new(handler, services),
            config,
        }
    }

    pub fn run(self) -> anyhow::Result<()> {
        let runtime = RuntimeBuilder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        runtime.block_on(async move { self.run_async().await })
    }

    async fn run_async(self) -> anyhow::Result<()> {
        let listener = StdTcpListener::bind(self.config.addr)
            .with_context(|| format!("failed to bind dev server to {}", self.config.addr))?;
        listener
            .set_nonblocking(true)
            .context("failed to set listener to non-blocking")?;
        let listener = tokio::net::TcpListener::from_std(listener)
            .context("failed to adopt std listener into tokio")?;

        log::info!("storefront listening on http://{}", self.config.addr);
        self.serve(listener).await
    }

    async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let AxumDevServer { service, config } = self;
        let router = Router::new().fallback_service(service_fn(move |req| {
            let mut svc = service.clone();
            async move { svc.call(req).await }
        }));
        let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

        let server = axum::serve(listener, make_service);
        if config.enable_ctrl_c {
            server
                .with_graceful_shutdown(async {
                    let _ = signal::ctrl_c().await;
                })
                .await
                .context("axum server error")?;
        } else {
            server.await.context("axum server error")?;
        }
        Ok(())
    }
}

/// Load the manifest, install the logger and serve `handler` until interrupted.
pub fn run_app<H: IntoHandler>(manifest_src: &str, handler: H) -> anyhow::Result<()> {
    let loader = ManifestLoader::load_from_str(manifest_src).context("invalid manifest")?;
    let manifest = loader.manifest();

    SimpleLogger::new()
        .with_level(manifest.logging().effective_level())
        .init()
        .ok();

    let services = StorefrontServices::from_manifest(manifest)?;
    AxumDevServer::new(handler.into_handler(), services).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecart_core::context::RequestContext;
    use edgecart_core::env::{Environment, SESSION_SECRET};
    use edgecart_core::error::EdgeError;
    use edgecart_core::manifest::ManifestLoader;
    use std::time::{Duration, Instant};

    async fn hello(ctx: RequestContext) -> Result<String, EdgeError> {
        let buyer = ctx
            .request()
            .headers()
            .get("oxygen-buyer-ip")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        Ok(format!("hello {buyer}"))
    }

    fn services(env: Environment) -> StorefrontServices {
        let loader = ManifestLoader::load_from_str("").expect("manifest");
        let defaults = StorefrontServices::from_manifest(loader.manifest()).expect("services");
        StorefrontServices::new(defaults.context().clone(), env)
    }

    async fn send_with_retry(client: &reqwest::Client, url: &str) -> reqwest::Response {
        let start = Instant::now();
        loop {
            match client.get(url).send().await {
                Ok(response) => return response,
                Err(err) if start.elapsed() >= Duration::from_secs(2) => {
                    panic!("server did not respond before timeout: {err}")
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }

    #[test]
    fn default_config_listens_on_localhost() {
        let config = AxumDevServerConfig::default();
        assert_eq!(config.addr, SocketAddr::from(([127, 0, 0, 1], 3000)));
        assert!(config.enable_ctrl_c);
    }

    #[test]
    fn run_app_rejects_invalid_manifest() {
        let err = run_app("[logging]\nlevel = \"loud\"\n", hello).expect_err("invalid manifest");
        assert!(err.to_string().contains("invalid manifest"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serves_handler_with_peer_address() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let config = AxumDevServerConfig {
            addr,
            enable_ctrl_c: false,
        };
        let env = Environment::new().with(SESSION_SECRET, "abc123");
        let server = AxumDevServer::with_config(hello.into_handler(), services(env), config);
        let handle = tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let client = reqwest::Client::new();
        let response = send_with_retry(&client, &format!("http://{addr}/")).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "hello 127.0.0.1");

        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fails_to_bind_to_used_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind first");
        let config = AxumDevServerConfig {
            addr: listener.local_addr().expect("listener addr"),
            enable_ctrl_c: false,
        };
        let server =
            AxumDevServer::with_config(hello.into_handler(), services(Environment::new()), config);

        let result = tokio::task::spawn_blocking(move || server.run()).await;
        match result {
            Ok(Err(err)) => assert!(err.to_string().contains("bind")),
            _ => panic!("expected bind error"),
        }
        drop(listener);
    }
}
