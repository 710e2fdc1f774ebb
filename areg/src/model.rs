//! Component model: declarative description of the threads of a process,
//! the stubs they host and the proxies they use.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use areg::{ModelBuilder, ComponentSpec, ProcessHub, ServiceInterface, ServiceStub, StubBase, RequestEvent, Version};
//! # #[derive(Default)] struct Clock;
//! # impl ServiceStub for Clock {
//! #     fn process_request(&mut self, _: &mut StubBase, _: &RequestEvent) -> areg::Result<()> { Ok(()) }
//! # }
//! let clock = Arc::new(ServiceInterface::builder("Clock", Version::new(1, 0, 0)).build()?);
//! let model = ModelBuilder::new("clock-app")
//!     .thread("worker")
//!     .component(ComponentSpec::new("clock").service(clock.clone(), Clock::default))
//!     .thread("ui")
//!     .component(ComponentSpec::new("display").depends_on("clock", clock))
//!     .build()?;
//!
//! let hub = ProcessHub::new("clock-app");
//! hub.load_model(&model)?;
//! # Ok::<(), areg::Error>(())
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::hub::ProcessHub;
use crate::interface::ServiceInterface;
use crate::service::ServiceStub;
use crate::{Error, Result};

/// Creates a fresh stub handler each time the model is loaded
pub type StubFactory = Arc<dyn Fn() -> Box<dyn ServiceStub> + Send + Sync>;

/// Service a component provides
#[derive(Clone)]
pub struct ServiceSpec {
    pub interface: Arc<ServiceInterface>,
    pub factory: StubFactory,
}

impl fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSpec")
            .field("interface", &self.interface.name())
            .finish()
    }
}

/// Service of another component this one calls
#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub role: String,
    pub interface: Arc<ServiceInterface>,
}

/// A role hosted on one thread
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub role: String,
    pub services: Vec<ServiceSpec>,
    pub dependencies: Vec<DependencySpec>,
}

impl ComponentSpec {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            services: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Provide `interface`, implemented by stubs `factory` creates
    pub fn service<S, F>(mut self, interface: Arc<ServiceInterface>, factory: F) -> Self
    where
        S: ServiceStub + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.services.push(ServiceSpec {
            interface,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn ServiceStub>),
        });
        self
    }

    /// Use `interface` as provided by the component `role`
    pub fn depends_on(mut self, role: impl Into<String>, interface: Arc<ServiceInterface>) -> Self {
        self.dependencies.push(DependencySpec {
            role: role.into(),
            interface,
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct ThreadSpec {
    pub name: String,
    pub components: Vec<ComponentSpec>,
}

/// Validated set of threads and components
#[derive(Debug, Clone)]
pub struct ComponentModel {
    pub name: String,
    pub threads: Vec<ThreadSpec>,
}

impl ComponentModel {
    /// Reject empty or duplicate thread and role names
    pub fn validate(&self) -> Result<()> {
        let mut threads = HashSet::new();
        let mut roles = HashSet::new();
        for thread in &self.threads {
            if thread.name.is_empty() {
                return Err(Error::configuration(
                    format!("model '{}' has an unnamed thread", self.name),
                    Some("thread".to_string()),
                ));
            }
            if !threads.insert(thread.name.as_str()) {
                return Err(Error::duplicate_name("thread", &thread.name));
            }
            for component in &thread.components {
                if component.role.is_empty() {
                    return Err(Error::configuration(
                        format!("thread '{}' has an unnamed component", thread.name),
                        Some("role".to_string()),
                    ));
                }
                if !roles.insert(component.role.as_str()) {
                    return Err(Error::duplicate_name("role", &component.role));
                }
            }
        }
        Ok(())
    }

    pub fn thread(&self, name: &str) -> Option<&ThreadSpec> {
        self.threads.iter().find(|thread| thread.name == name)
    }

    pub fn component(&self, role: &str) -> Option<&ComponentSpec> {
        self.threads
            .iter()
            .flat_map(|thread| &thread.components)
            .find(|component| component.role == role)
    }
}

/// Builder for [`ComponentModel`]. Components attach to the thread declared
/// last.
#[derive(Debug)]
pub struct ModelBuilder {
    name: String,
    threads: Vec<ThreadSpec>,
    orphans: Vec<String>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            threads: Vec::new(),
            orphans: Vec::new(),
        }
    }

    pub fn thread(mut self, name: impl Into<String>) -> Self {
        self.threads.push(ThreadSpec {
            name: name.into(),
            components: Vec::new(),
        });
        self
    }

    pub fn component(mut self, component: ComponentSpec) -> Self {
        match self.threads.last_mut() {
            Some(thread) => thread.components.push(component),
            None => self.orphans.push(component.role),
        }
        self
    }

    pub fn build(self) -> Result<ComponentModel> {
        if let Some(role) = self.orphans.first() {
            return Err(Error::configuration(
                format!("component '{role}' declared before any thread"),
                Some("thread".to_string()),
            ));
        }
        let model = ComponentModel {
            name: self.name,
            threads: self.threads,
        };
        model.validate()?;
        Ok(model)
    }
}

impl ProcessHub {
    /// Start every thread of `model`, then its stubs and the proxies its
    /// components depend on. On failure everything started is stopped again.
    pub fn load_model(&self, model: &ComponentModel) -> Result<()> {
        model.validate()?;
        tracing::info!("📦 Loading model '{}'", model.name);
        let mut started = Vec::new();
        if let Err(e) = self.start_model(model, &mut started) {
            tracing::error!("❌ Loading model '{}' failed: {}", model.name, e);
            for thread in started.iter().rev() {
                let _ = self.stop_thread(thread);
            }
            return Err(e);
        }
        Ok(())
    }

    fn start_model(&self, model: &ComponentModel, started: &mut Vec<String>) -> Result<()> {
        for thread in &model.threads {
            self.start_thread(&thread.name)?;
            started.push(thread.name.clone());
        }
        for thread in &model.threads {
            for component in &thread.components {
                for service in &component.services {
                    self.start_stub_boxed(
                        &thread.name,
                        &component.role,
                        service.interface.clone(),
                        (service.factory)(),
                    )?;
                }
                for dependency in &component.dependencies {
                    self.create_proxy(&thread.name, &dependency.role, dependency.interface.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Stop the threads of `model`; their stubs and proxies shut down with them
    pub fn unload_model(&self, model: &ComponentModel) -> Result<()> {
        let mut result = Ok(());
        for thread in model.threads.iter().rev() {
            if self.dispatcher(&thread.name).is_none() {
                continue;
            }
            if let Err(e) = self.stop_thread(&thread.name) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        tracing::info!("Unloaded model '{}'", model.name);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RequestEvent;
    use crate::message::Version;
    use crate::service::StubBase;

    struct Idle;

    impl ServiceStub for Idle {
        fn process_request(&mut self, _: &mut StubBase, _: &RequestEvent) -> Result<()> {
            Ok(())
        }
    }

    fn interface(name: &str) -> Arc<ServiceInterface> {
        Arc::new(ServiceInterface::builder(name, Version::new(1, 0, 0)).build().unwrap())
    }

    #[test]
    fn test_duplicate_names_rejected_before_start() {
        let err = ModelBuilder::new("m")
            .thread("worker")
            .thread("worker")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { kind: "thread", .. }));

        let err = ModelBuilder::new("m")
            .thread("a")
            .component(ComponentSpec::new("calc").service(interface("Calc"), || Idle))
            .thread("b")
            .component(ComponentSpec::new("calc"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { kind: "role", .. }));
    }

    #[test]
    fn test_component_requires_thread() {
        let err = ModelBuilder::new("m")
            .component(ComponentSpec::new("calc"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_load_and_unload() {
        let calc = interface("Calc");
        let model = ModelBuilder::new("m")
            .thread("model-worker")
            .component(ComponentSpec::new("calc").service(calc.clone(), || Idle))
            .thread("model-client")
            .component(ComponentSpec::new("client").depends_on("calc", calc.clone()))
            .build()
            .unwrap();
        assert_eq!(model.component("client").unwrap().dependencies.len(), 1);

        let hub = ProcessHub::new("model-test");
        hub.load_model(&model).unwrap();
        assert!(hub.dispatcher("model-worker").is_some());
        let proxy = hub.create_proxy("model-client", "calc", calc).unwrap();
        assert_eq!(hub.proxy_count(), 1);

        hub.unload_model(&model).unwrap();
        assert!(hub.dispatcher("model-worker").is_none());
        assert!(hub.dispatcher("model-client").is_none());
        assert_eq!(hub.proxy_count(), 0);
        assert!(!proxy.is_connected());
        hub.shutdown();
    }

    #[test]
    fn test_failed_load_is_rolled_back() {
        let hub = ProcessHub::new("model-rollback");
        hub.start_thread("taken").unwrap();
        let model = ModelBuilder::new("m")
            .thread("fresh")
            .thread("taken")
            .build()
            .unwrap();
        assert!(hub.load_model(&model).is_err());
        assert!(hub.dispatcher("fresh").is_none());
        assert!(hub.dispatcher("taken").is_some());
        hub.shutdown();
    }
}
