#![allow(clippy::upper_case_acronyms)]

use std::sync::Arc;

use pingora::services::listening::Service;
use pingora_core::{
    apps::HttpServerOptions,
    listeners::tls::TlsSettings,
    server::{configuration::Opt, Server},
};
use pingora_proxy::{http_proxy_service_with_name, HttpProxy};
use sentry::IntoDsn;

use edgerouter::{
    admin::AdminHttpApp,
    backend::ListenerRegistry,
    config::{self, Config},
    handler::Collaborators,
    logging::init_logging,
    router::RequestRouter,
    service::http::EdgeService,
};

const EDGEROUTER_SERVICE: &str = "edgerouter";

fn main() {
    // Read command-line arguments
    let cli_options = Opt::parse_args();

    // Load configuration with optional override
    let config = match Config::load_yaml_with_opt_override(&cli_options) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let logger = init_logging(config.edgerouter.log.as_ref());

    // Seed listener endpoints and build the route table
    log::info!("Loading routes...");
    let listeners = Arc::new(ListenerRegistry::new());
    let router = Collaborators::from_config(&config, listeners.clone())
        .and_then(|collaborators| RequestRouter::from_config(&config, &collaborators));
    let router = match router {
        Ok(router) => Arc::new(router),
        Err(e) => {
            eprintln!("Failed to build routes: {e}");
            std::process::exit(1);
        }
    };

    let mut edgerouter_server = Server::new_with_opt_and_conf(Some(cli_options), config.pingora);

    if let Some(log_service) = logger {
        log::info!("Adding log sync service...");
        edgerouter_server.add_service(log_service);
    }

    let mut http_service = http_proxy_service_with_name(
        &edgerouter_server.configuration,
        EdgeService::new(router),
        EDGEROUTER_SERVICE,
    );

    log::info!("Adding listeners...");
    if let Err(e) = add_listeners(&mut http_service, &config.edgerouter) {
        eprintln!("Failed to add listeners: {e}");
        std::process::exit(1);
    }

    add_optional_services(&mut edgerouter_server, &config.edgerouter, listeners);

    log::info!("Bootstrapping...");
    edgerouter_server.bootstrap();
    log::info!("Bootstrapped. Adding Services...");
    edgerouter_server.add_service(http_service);

    log::info!("Starting Server...");
    edgerouter_server.run_forever();
}

/// Add listeners for HTTP service, supporting TCP and TLS
fn add_listeners(
    http_service: &mut Service<HttpProxy<EdgeService>>,
    cfg: &config::EdgeRouter,
) -> Result<(), Box<dyn std::error::Error>> {
    for list_cfg in cfg.listeners.iter() {
        let address = list_cfg.address.to_string();
        match &list_cfg.tls {
            Some(config::Tls {
                cert_path,
                key_path,
            }) => {
                let mut settings = TlsSettings::intermediate(cert_path, key_path)?;
                if list_cfg.offer_h2 {
                    settings.enable_h2();
                }
                http_service.add_tls_with_settings(&address, None, settings);
            }
            None => {
                if list_cfg.offer_h2c {
                    let http_logic = http_service
                        .app_logic_mut()
                        .ok_or("Failed to get app logic")?;
                    let mut http_server_options = HttpServerOptions::default();
                    http_server_options.h2c = true;
                    http_logic.server_options = Some(http_server_options);
                }
                http_service.add_tcp(&address);
            }
        }
    }
    Ok(())
}

/// Add optional services (Sentry, Prometheus, Admin)
fn add_optional_services(
    server: &mut Server,
    cfg: &config::EdgeRouter,
    listeners: Arc<ListenerRegistry>,
) {
    if let Some(sentry_cfg) = &cfg.sentry {
        log::info!("Adding Sentry config...");
        match sentry_cfg.dsn.clone().into_dsn() {
            Ok(Some(dsn)) => {
                server.sentry = Some(sentry::ClientOptions {
                    dsn: Some(dsn),
                    ..Default::default()
                });
            }
            Ok(None) => log::warn!("Sentry DSN is empty or invalid, Sentry disabled."),
            Err(e) => log::error!("Error parsing Sentry DSN: {e}"),
        }
    }

    if let Some(admin_cfg) = &cfg.admin {
        log::info!("Adding Admin HTTP...");
        server.add_service(AdminHttpApp::admin_http_service(admin_cfg, listeners));
    }

    if let Some(prometheus_cfg) = &cfg.prometheus {
        log::info!("Adding Prometheus HTTP...");
        let mut prometheus_service_http = Service::prometheus_http_service();
        prometheus_service_http.add_tcp(&prometheus_cfg.address.to_string());
        server.add_service(prometheus_service_http);
    }
}
