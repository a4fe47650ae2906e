use std::fs;
use std::net::SocketAddr;
use std::{collections::BTreeMap, fmt};

use log::{debug, trace};
use once_cell::sync::Lazy;
use pingora::server::configuration::{Opt, ServerConf};
use pingora_error::{Error, ErrorType::*, OrErr, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use validator::{Validate, ValidationError};

use crate::backend::{task::ExecutionRole, Endpoint, Scheme};
use crate::core::ErrorExposure;

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:\d{1,3}\.){3}\d{1,3}|\[?[0-9a-f:]+\]?|[a-z0-9.-]+)$").unwrap()
});

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_references"))]
pub struct Config {
    #[serde(default)]
    pub pingora: ServerConf,

    #[validate(nested)]
    pub edgerouter: EdgeRouter,

    #[serde(default)]
    pub backends: BTreeMap<String, Backend>,

    #[validate(nested)]
    pub cache: Option<Cache>,

    #[validate(nested)]
    pub task_pool: Option<TaskPool>,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub routes: Vec<Route>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    // config file load entry point
    pub fn load_yaml_with_opt_override(opt: &Opt) -> Result<Self> {
        if let Some(path) = &opt.conf {
            let mut conf = Self::load_from_yaml(path)?;
            conf.merge_with_opt(opt);
            Ok(conf)
        } else {
            Error::e_explain(ReadError, "No path specified")
        }
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .or_err_with(FileReadError, || "Conf file valid failed")?;

        Ok(conf)
    }

    pub fn merge_with_opt(&mut self, opt: &Opt) {
        if opt.daemon {
            self.pingora.daemon = true;
        }
    }

    fn validate_references(&self) -> Result<(), ValidationError> {
        for (name, backend) in &self.backends {
            backend.validate().map_err(|_| {
                let mut err = ValidationError::new("invalid_backend");
                err.add_param("backend".into(), name);
                err
            })?;
        }

        let require_backend = |name: &str| {
            if self.backends.contains_key(name) {
                Ok(())
            } else {
                let mut err = ValidationError::new("unknown_backend");
                err.add_param("backend".into(), &name.to_string());
                Err(err)
            }
        };

        if let Some(cache) = &self.cache {
            require_backend(&cache.backend)?;
        }
        if let Some(pool) = &self.task_pool {
            require_backend(&pool.backend)?;
        }

        for route in &self.routes {
            if let Some(target) = &route.forward {
                require_backend(target)?;
            }
            let Some(handler) = &route.handler else {
                continue;
            };
            for name in handler.referenced_backends() {
                require_backend(&name)?;
            }
            match handler.kind.as_str() {
                "cache_aside" if self.cache.is_none() => {
                    return Err(ValidationError::new("cache_required"))
                }
                "run_task" if self.task_pool.is_none() => {
                    return Err(ValidationError::new("task_pool_required"))
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct EdgeRouter {
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub listeners: Vec<Listener>,

    pub log: Option<Log>,
    #[validate(nested)]
    pub admin: Option<Admin>,
    pub prometheus: Option<Prometheus>,
    pub sentry: Option<Sentry>,

    #[serde(default)]
    pub error_exposure: ErrorExposureConf,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Listener::validate_tls_for_offer_h2"))]
pub struct Listener {
    pub address: SocketAddr,
    pub tls: Option<Tls>,
    #[serde(default)]
    pub offer_h2: bool,
    #[serde(default)]
    pub offer_h2c: bool,
}

impl Listener {
    fn validate_tls_for_offer_h2(&self) -> Result<(), ValidationError> {
        if self.offer_h2 && self.tls.is_none() {
            Err(ValidationError::new("tls_required_for_h2"))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tls {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub path: String,
    /// Rotate to `<path>.1` once the file would grow past this many bytes.
    pub max_size: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Admin {
    pub address: SocketAddr,
    #[validate(length(min = 1))]
    pub api_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prometheus {
    pub address: SocketAddr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sentry {
    pub dsn: String,
}

/// Redaction of `500` bodies. Absent `allow_list` means full exposure.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct ErrorExposureConf {
    pub allow_list: Option<Vec<String>>,
}

impl From<&ErrorExposureConf> for ErrorExposure {
    fn from(value: &ErrorExposureConf) -> Self {
        match &value.allow_list {
            Some(fields) => ErrorExposure::AllowList(fields.clone()),
            None => ErrorExposure::Full,
        }
    }
}

/// A named backing listener and its initial endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Backend {
    #[validate(regex(path = *HOSTNAME_RE))]
    pub hostname: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default)]
    pub scheme: Scheme,
}

impl Backend {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.hostname.clone(), self.port)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Cache {
    #[validate(length(min = 1))]
    pub backend: String,
    pub password: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct TaskPool {
    #[validate(length(min = 1))]
    pub backend: String,
    #[validate(length(min = 1))]
    pub cluster: String,
    #[validate(length(min = 1))]
    pub task_definition: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Route::validate"))]
pub struct Route {
    pub path: String,
    pub method: Option<HttpMethod>,
    pub handler: Option<HandlerConf>,
    pub forward: Option<String>,
    pub role: Option<ExecutionRole>,
}

impl Route {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.path.starts_with('/') {
            return Err(ValidationError::new("path_must_start_with_slash"));
        }

        match (&self.handler, &self.forward) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(ValidationError::new("handler_or_forward_required"))
            }
            (Some(_), None) if self.method.is_none() => {
                return Err(ValidationError::new("method_required_for_handler"))
            }
            (None, Some(_)) if self.method.is_some() => {
                return Err(ValidationError::new("forward_takes_no_method"))
            }
            _ => {}
        }

        let runs_tasks = self
            .handler
            .as_ref()
            .is_some_and(|h| h.kind == "run_task");
        match (runs_tasks, &self.role) {
            (true, None) => Err(ValidationError::new("role_required_for_run_task")),
            (false, Some(_)) => Err(ValidationError::new("role_only_for_run_task")),
            _ => Ok(()),
        }
    }
}

/// Which handler serves a route, and its options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandlerConf {
    pub kind: String,
    #[serde(default)]
    pub options: YamlValue,
}

impl HandlerConf {
    /// Backend names mentioned in the options, for reference checking.
    fn referenced_backends(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(origin) = self.options.get("origin").and_then(|v| v.as_str()) {
            names.push(origin.to_string());
        }
        if let Some(listeners) = self.options.get("listeners").and_then(|v| v.as_sequence()) {
            names.extend(listeners.iter().filter_map(|v| v.as_str()).map(str::to_string));
        }
        names
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
    CONNECT,
    TRACE,
    PURGE,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let method = match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
            HttpMethod::CONNECT => "CONNECT",
            HttpMethod::TRACE => "TRACE",
            HttpMethod::PURGE => "PURGE",
        };
        write!(f, "{}", method)
    }
}
