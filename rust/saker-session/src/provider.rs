//! Implementation providers and the registration-time binding table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::RegistryError;
use crate::interface::{InterfaceDef, ServiceImpl};
use crate::remote::Remote;

/// Constructible from the owning peer's handle.
///
/// The per-connection analogue of constructor injection: an implementation
/// registered with [`Bindings::add_constructed`] receives the `Remote` it
/// serves, so it can call back into its own client.
pub trait FromRemote {
    fn from_remote(remote: Remote) -> Self;
}

/// Strategy for producing the instance that serves an interface for a
/// connection.
pub enum Provider {
    /// One pre-constructed instance shared by every connection. The instance
    /// must be safe for concurrent use — all active connections see it.
    Shared(Arc<dyn ServiceImpl>),
    /// A fresh instance per connection, constructed from the owning
    /// [`Remote`].
    Constructed(fn(Remote) -> Arc<dyn ServiceImpl>),
    /// A fresh instance per connection, produced by a caller-supplied
    /// factory.
    Factory(Box<dyn Fn(Remote) -> Arc<dyn ServiceImpl> + Send + Sync>),
}

impl Provider {
    /// Produce the instance serving `remote`'s connection.
    ///
    /// Called at most once per (connection, interface): the connection's
    /// driver caches the result for the life of the connection.
    pub fn provide_for(&self, remote: &Remote) -> Arc<dyn ServiceImpl> {
        match self {
            Provider::Shared(instance) => instance.clone(),
            Provider::Constructed(construct) => construct(remote.clone()),
            Provider::Factory(factory) => factory(remote.clone()),
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Provider::Shared(_) => "Shared",
            Provider::Constructed(_) => "Constructed",
            Provider::Factory(_) => "Factory",
        };
        f.write_str(name)
    }
}

/// One registered interface: its descriptor and its provider.
pub struct Binding {
    pub def: &'static InterfaceDef,
    pub provider: Provider,
}

/// The interface-to-provider table, assembled before an endpoint starts and
/// immutable afterwards.
///
/// Registration validates the descriptor at the call: methods must exist and
/// signatures must be unique. Argument serializability and the void return
/// contract need no checking — they are structural (`ArgKind` is a closed
/// table and `ServiceImpl::invoke` returns no value).
#[derive(Default)]
pub struct Bindings {
    map: HashMap<&'static str, Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared instance for `def`. Every connection resolves to
    /// this same object.
    pub fn add_shared(
        &mut self,
        def: &'static InterfaceDef,
        instance: Arc<dyn ServiceImpl>,
    ) -> Result<(), RegistryError> {
        self.insert(def, Provider::Shared(instance))
    }

    /// Register a per-connection implementation type for `def`. Each
    /// connection gets its own instance, constructed with the owning
    /// [`Remote`].
    pub fn add_constructed<T>(&mut self, def: &'static InterfaceDef) -> Result<(), RegistryError>
    where
        T: ServiceImpl + FromRemote + 'static,
    {
        fn construct<T: ServiceImpl + FromRemote + 'static>(remote: Remote) -> Arc<dyn ServiceImpl> {
            Arc::new(T::from_remote(remote))
        }
        self.insert(def, Provider::Constructed(construct::<T>))
    }

    /// Register a factory for `def`. Each connection gets its own instance,
    /// produced by the factory from the owning [`Remote`].
    pub fn add_factory<F, T>(
        &mut self,
        def: &'static InterfaceDef,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(Remote) -> T + Send + Sync + 'static,
        T: ServiceImpl + 'static,
    {
        self.insert(
            def,
            Provider::Factory(Box::new(move |remote| Arc::new(factory(remote)))),
        )
    }

    fn insert(
        &mut self,
        def: &'static InterfaceDef,
        provider: Provider,
    ) -> Result<(), RegistryError> {
        validate(def)?;
        if self.map.contains_key(def.name) {
            return Err(RegistryError::DuplicateInterface(def.name.to_string()));
        }
        self.map.insert(def.name, Binding { def, provider });
        Ok(())
    }

    pub fn get(&self, interface: &str) -> Option<&Binding> {
        self.map.get(interface)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn validate(def: &'static InterfaceDef) -> Result<(), RegistryError> {
    if def.name.is_empty() {
        return Err(RegistryError::InvalidInterface {
            interface: String::from("<unnamed>"),
            detail: String::from("interface name is empty"),
        });
    }
    if def.methods.is_empty() {
        return Err(RegistryError::InvalidInterface {
            interface: def.name.to_string(),
            detail: String::from("interface declares no methods"),
        });
    }
    for (i, method) in def.methods.iter().enumerate() {
        if method.name.is_empty() {
            return Err(RegistryError::InvalidInterface {
                interface: def.name.to_string(),
                detail: format!("method {i} has an empty name"),
            });
        }
        let duplicated = def.methods[..i]
            .iter()
            .any(|m| m.name == method.name && m.params == method.params);
        if duplicated {
            return Err(RegistryError::InvalidInterface {
                interface: def.name.to_string(),
                detail: format!("duplicate method signature: {}", method.name),
            });
        }
    }
    Ok(())
}
