//! Wires the HTTP handlers in [`crate::http`] into a running `actix-web`
//! server. Grounded in the teacher's `ServicesBuilder` (bind/port/prefix
//! builder, `HttpServer::bind(..).run()`, a `ServerHandle` + `JoinHandle`
//! pair returned so the caller can shut down gracefully), with the
//! extractor/websocket wiring replaced by the registry's own route table.

use std::sync::Arc;

use actix_web::dev::ServerHandle;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use tokio::task::JoinHandle;
use xreg_storage::PostgresGateway;

use crate::http::{self, AppState};

pub struct ServicesBuilder {
    prefix: String,
    port: u16,
    bind: String,
    gateway: Arc<PostgresGateway>,
    default_registry_uid: String,
}

impl ServicesBuilder {
    pub fn new(gateway: Arc<PostgresGateway>, default_registry_uid: String) -> Self {
        Self { prefix: String::new(), port: 4242, bind: "0.0.0.0".to_owned(), gateway, default_registry_uid }
    }

    pub fn prefix(mut self, v: &str) -> Self {
        self.prefix = v.to_owned();
        self
    }

    pub fn bind(mut self, v: &str) -> Self {
        self.bind = v.to_owned();
        self
    }

    pub fn port(mut self, v: u16) -> Self {
        self.port = v;
        self
    }

    pub fn run(self) -> Result<(ServerHandle, JoinHandle<std::io::Result<()>>), std::io::Error> {
        let state = web::Data::new(AppState::new(self.gateway.clone(), self.default_registry_uid.clone()));
        let prefix = self.prefix.clone();
        let server = HttpServer::new(move || {
            let scope = web::scope(&prefix)
                .route("", web::get().to(http::get))
                .route("/{tail:.*}", web::get().to(http::get))
                .route("/{tail:.*}", web::put().to(http::put_resource))
                .route("/{tail:.*}", web::delete().to(http::delete));
            App::new().app_data(state.clone()).service(scope).wrap(Logger::default())
        })
        .bind((self.bind.as_str(), self.port))?
        .run();
        let handle = server.handle();
        let task = tokio::spawn(server);
        Ok((handle, task))
    }
}
