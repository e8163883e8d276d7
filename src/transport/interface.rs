use super::{codec, RpcError};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

/// Name and parameter types of one interface method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub name: &'static str,
    pub params: &'static [&'static str],
    /// Whether callers of this method can observe a transport failure.
    pub raises_rpc: bool,
}

impl Signature {
    pub const fn remote(name: &'static str, params: &'static [&'static str]) -> Self {
        Self {
            name,
            params,
            raises_rpc: true,
        }
    }

    pub const fn local(name: &'static str, params: &'static [&'static str]) -> Self {
        Self {
            name,
            params,
            raises_rpc: false,
        }
    }

    pub fn accepts(&self, params: &[String]) -> bool {
        self.params.len() == params.len() && self.params.iter().zip(params).all(|(a, b)| a == b)
    }
}

/// Why a handler did not produce a return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The target raised an application failure; the payload is its encoding.
    Raised(Vec<u8>),
    Rpc(RpcError),
}

pub struct Method<T: ?Sized> {
    pub signature: Signature,
    pub handler: fn(&T, &[u8]) -> Result<Vec<u8>, Fault>,
}

impl<T: ?Sized> Method<T> {
    pub fn new(signature: Signature, handler: fn(&T, &[u8]) -> Result<Vec<u8>, Fault>) -> Self {
        Self { signature, handler }
    }
}

/// A remotely callable interface, implemented for the interface's trait
/// object type.
pub trait Remote: Send + Sync + 'static {
    const NAME: &'static str;

    fn methods() -> Vec<Method<Self>>;
}

/// Decodes the argument tuple, runs `f`, and encodes whatever it produced.
pub fn invoke<A, R, E, F>(args: &[u8], f: F) -> Result<Vec<u8>, Fault>
where
    A: DeserializeOwned,
    R: Serialize,
    E: Serialize,
    F: FnOnce(A) -> Result<R, E>,
{
    let args = codec::decode(args).map_err(Fault::Rpc)?;
    match f(args) {
        Ok(value) => codec::encode(&value).map_err(Fault::Rpc),
        Err(err) => Err(Fault::Raised(codec::encode(&err).map_err(Fault::Rpc)?)),
    }
}

/// Method table of a validated remote interface.
pub(crate) struct Dispatch<T: ?Sized> {
    methods: HashMap<&'static str, Vec<Method<T>>>,
}

impl<T: Remote + ?Sized> Dispatch<T> {
    /// Builds the table, failing if any method cannot raise a transport failure
    /// or if two methods share a signature.
    pub fn new() -> Result<Self, RpcError> {
        let not_remote = |reason: String| RpcError::NotRemote {
            interface: T::NAME.to_string(),
            reason,
        };
        let mut methods: HashMap<&'static str, Vec<Method<T>>> = HashMap::new();
        for method in T::methods() {
            let sig = method.signature;
            if !sig.raises_rpc {
                return Err(not_remote(format!(
                    "method {} does not raise transport failures",
                    sig.name
                )));
            }
            let overloads = methods.entry(sig.name).or_default();
            if overloads.iter().any(|m| m.signature.params == sig.params) {
                return Err(not_remote(format!("method {} is declared twice", sig.name)));
            }
            overloads.push(method);
        }
        Ok(Self { methods })
    }

    pub fn resolve(
        &self,
        method: &str,
        params: &[String],
    ) -> Option<fn(&T, &[u8]) -> Result<Vec<u8>, Fault>> {
        self.methods
            .get(method)?
            .iter()
            .find(|m| m.signature.accepts(params))
            .map(|m| m.handler)
    }
}
