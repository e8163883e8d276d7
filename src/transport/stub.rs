use super::{
    codec::{self, Call, Reply},
    interface::Dispatch,
    skeleton::reachable,
    Remote, RpcError, Signature, Skeleton,
};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
};

/// Calling side of remote interface `T`, bound to one address for its whole
/// life.
///
/// Equality, hashing and formatting use only the interface name and the
/// address; they never touch the network.
pub struct Stub<T: Remote + ?Sized> {
    addr: SocketAddr,
    _interface: PhantomData<fn(&T)>,
}

impl<T: Remote + ?Sized> Stub<T> {
    pub fn new(addr: SocketAddr) -> Result<Self, RpcError> {
        Dispatch::<T>::new()?;
        Ok(Self {
            addr,
            _interface: PhantomData,
        })
    }

    /// Stub for a skeleton that has a fixed address or has been started.
    pub fn from_skeleton(skeleton: &Skeleton<T>) -> Result<Self, RpcError> {
        let addr = skeleton.address().ok_or(RpcError::Unbound)?;
        Self::new(reachable(addr))
    }

    /// Like [`Stub::from_skeleton`], but reaches the skeleton's port through
    /// `hostname`, for when the bound address is not routable by peers.
    pub fn from_skeleton_with_host(
        skeleton: &Skeleton<T>,
        hostname: &str,
    ) -> Result<Self, RpcError> {
        let port = skeleton.address().ok_or(RpcError::Unbound)?.port();
        let addr = (hostname, port)
            .to_socket_addrs()
            .map_err(|err| RpcError::Resolve(format!("{}: {}", hostname, err)))?
            .next()
            .ok_or_else(|| RpcError::Resolve(hostname.to_string()))?;
        Self::new(addr)
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// Performs one call over a fresh connection.
    ///
    /// A failure raised by the remote target comes back as the same `E`;
    /// anything that goes wrong on the way is an [`RpcError`] converted into `E`.
    pub fn call<A, R, E>(&self, signature: &Signature, args: &A) -> Result<R, E>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
        E: DeserializeOwned + From<RpcError>,
    {
        match self.round_trip(signature, args)? {
            Reply::Return(value) => Ok(codec::decode(&value)?),
            Reply::Raised(payload) => Err(codec::decode::<E>(&payload)?),
            Reply::Failed(err) => Err(err.into()),
        }
    }

    fn round_trip<A: Serialize + ?Sized>(
        &self,
        signature: &Signature,
        args: &A,
    ) -> Result<Reply, RpcError> {
        let call = Call {
            interface: T::NAME.to_string(),
            method: signature.name.to_string(),
            params: signature.params.iter().map(|p| p.to_string()).collect(),
            args: codec::encode(args)?,
        };
        let mut stream = TcpStream::connect(self.addr).map_err(|err| RpcError::Connect {
            addr: self.addr,
            cause: err.to_string(),
        })?;
        codec::write_frame(&mut stream, &call)?;
        codec::read_frame(&mut stream)
    }
}

impl<T: Remote + ?Sized> Clone for Stub<T> {
    fn clone(&self) -> Self {
        Self {
            addr: self.addr,
            _interface: PhantomData,
        }
    }
}

impl<T: Remote + ?Sized> PartialEq for Stub<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<T: Remote + ?Sized> Eq for Stub<T> {}

impl<T: Remote + ?Sized> Hash for Stub<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        T::NAME.hash(state);
        self.addr.hash(state);
    }
}

impl<T: Remote + ?Sized> fmt::Debug for Stub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stub<{}>({})", T::NAME, self.addr)
    }
}

impl<T: Remote + ?Sized> fmt::Display for Stub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", T::NAME, self.addr)
    }
}

// A stub travels as (interface name, address) so it cannot be decoded as a
// stub for another interface.
impl<T: Remote + ?Sized> Serialize for Stub<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (T::NAME, self.addr).serialize(serializer)
    }
}

impl<'de, T: Remote + ?Sized> Deserialize<'de> for Stub<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (name, addr) = <(String, SocketAddr)>::deserialize(deserializer)?;
        if name != T::NAME {
            return Err(serde::de::Error::custom(format!(
                "expected a {} stub, got {}",
                T::NAME,
                name
            )));
        }
        Stub::new(addr).map_err(serde::de::Error::custom)
    }
}
