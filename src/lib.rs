#[macro_use]
extern crate rocket;

pub mod config;
pub mod error;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod store;
pub mod threading;

use crate::config::ThreadingConfig;
use crate::request_logger::RequestLogger;
use crate::store::MemoryMailStore;
use crate::threading::ThreadingService;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::Once;

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Every API handler plus the generated `openapi.json`.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health routes
        routes::health::health_check,
        // Message intake
        routes::messages::ingest_messages,
        routes::messages::sync_account,
        // Thread routes
        routes::threads::get_thread,
        routes::threads::list_threads,
        routes::threads::rethread_account,
        // Override routes
        routes::overrides::cut_message,
        routes::overrides::copy_message,
        // Index routes
        routes::index::index_status,
        routes::index::reset_index,
    ]
}

pub fn rocket() -> Rocket<Build> {
    init_logger();
    build_rocket(ThreadingConfig::from_env())
}

pub fn build_rocket(config: ThreadingConfig) -> Rocket<Build> {
    // Accounts fall back to memory-only threading when this fails
    match std::fs::create_dir_all(&config.store_base_path) {
        Ok(()) => log::info!(
            "thread store initialized at: {}",
            config.store_base_path.display()
        ),
        Err(err) => log::error!(
            "failed to create thread store at {}: {}",
            config.store_base_path.display(),
            err
        ),
    }

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    let request_logger = RequestLogger::new(config.slow_request_threshold);
    let service = ThreadingService::new(config);

    rocket::build()
        .attach(request_logger)
        .attach(cors)
        .manage(service)
        .manage(MemoryMailStore::new())
        .attach(AdHoc::on_shutdown("Close Thread Indexes", |rocket| {
            Box::pin(async move {
                if let Some(service) = rocket.state::<ThreadingService>() {
                    log::info!("closing thread indexes");
                    service.shutdown().await;
                }
            })
        }))
        .mount("/api/v1", api_routes())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Threadline API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use std::path::Path;
    use tempfile::TempDir;

    use crate::config::ThreadingConfig;
    use crate::store::MemoryMailStore;
    use crate::threading::ThreadingService;

    /// Throwaway thread store rooted in a temporary directory.
    pub struct TestStore {
        dir: TempDir,
    }

    impl TestStore {
        pub fn new() -> std::io::Result<Self> {
            Ok(Self {
                dir: tempfile::tempdir()?,
            })
        }

        pub fn path(&self) -> &Path {
            self.dir.path()
        }

        /// Environment-free configuration pointing at this store.
        pub fn config(&self) -> ThreadingConfig {
            ThreadingConfig::with_store_path(self.dir.path())
        }
    }

    /// Lightweight builder for Rocket instances used in integration tests.
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        threading: Option<ThreadingConfig>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                threading: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a threading service and an empty mail store for account routes.
        pub fn manage_threading(mut self, config: ThreadingConfig) -> Self {
            self.threading = Some(config);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(config) = self.threading {
                rocket = rocket
                    .manage(ThreadingService::new(config))
                    .manage(MemoryMailStore::new());
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }
}
