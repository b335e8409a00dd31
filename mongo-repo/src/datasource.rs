use std::collections::HashMap;

use crate::{
    Error, Model,
    config::ConnectorOptions,
    driver::{Driver, MongoDriver},
    error::Result,
    model::all_models,
};

/// A named driver handle.
#[derive(Clone, Debug)]
pub struct Connector<D> {
    name: String,
    database: String,
    driver: D,
}

impl<D: Driver> Connector<D> {
    pub fn new(name: impl Into<String>, database: impl Into<String>, driver: D) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
            driver,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl Connector<MongoDriver> {
    pub async fn connect(options: ConnectorOptions) -> Result<Self> {
        let driver = MongoDriver::connect(&options).await?;
        Ok(Self::new(options.name, options.database, driver))
    }

    pub async fn disconnect(self) {
        log::info!("connector {} disconnecting", self.name);
        self.driver.shutdown().await;
    }
}

/// Named connectors and the model-to-connector routing.
#[derive(Debug)]
pub struct Datasource<D> {
    connectors: HashMap<String, Connector<D>>,
    connector_by_model: HashMap<&'static str, String>,
}

impl<D> Default for Datasource<D> {
    fn default() -> Self {
        Self {
            connectors: HashMap::new(),
            connector_by_model: HashMap::new(),
        }
    }
}

impl<D: Driver> Datasource<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connector(&mut self, connector: Connector<D>) -> &mut Self {
        self.connectors.insert(connector.name.clone(), connector);
        self
    }

    pub fn connector(&self, name: &str) -> Result<&Connector<D>> {
        self.connectors
            .get(name)
            .ok_or_else(|| Error::ConnectorNotFound(name.to_string()))
    }

    pub fn register_model<T: Model>(&mut self) -> Result<&Connector<D>> {
        self.register(T::model_name(), T::connector_name())
    }

    fn register(&mut self, model: &'static str, connector: &str) -> Result<&Connector<D>> {
        if !self.connectors.contains_key(connector) {
            return Err(Error::ConnectorNotFound(connector.to_string()));
        }
        log::info!("model {model} registered on connector {connector}");
        self.connector_by_model.insert(model, connector.to_string());
        self.connector(connector)
    }

    pub fn model_connector<T: Model>(&self) -> Result<&Connector<D>> {
        let name = self
            .connector_by_model
            .get(T::model_name())
            .ok_or_else(|| Error::ModelNotRegistered(T::model_name().to_string()))?;
        self.connector(name)
    }

    /// Registers every derived model whose connector is known. Returns how
    /// many were registered.
    pub fn register_all(&mut self) -> usize {
        let mut registered = 0;
        for (model, meta) in all_models() {
            if self.register(model, meta.connector_name).is_ok() {
                registered += 1;
            } else {
                log::debug!("model {model} skipped: no connector {}", meta.connector_name);
            }
        }
        registered
    }
}

impl Datasource<MongoDriver> {
    /// Connects `options` and adds it under its name.
    pub async fn connect(&mut self, options: ConnectorOptions) -> Result<&mut Self> {
        let connector = Connector::connect(options).await?;
        Ok(self.add_connector(connector))
    }

    pub async fn destroy(self) {
        for (_, connector) in self.connectors {
            connector.disconnect().await;
        }
    }
}
