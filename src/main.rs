use log::{info, LevelFilter};
use rdfs::config::{NamingConfig, StorageConfig, REGISTRATION_PORT, SERVICE_PORT};
use rdfs::naming::{RegistrationStub, Service, ServiceStub};
use rdfs::storage::{Storage, StorageStub};
use rdfs::{NamingServer, Path, StorageServer, Stub};
use simple_logger::SimpleLogger;
use std::{
    error::Error,
    fs,
    io::{self, Write},
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    thread,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "rdfs", about = "A small distributed filesystem")]
enum Opt {
    /// Run the naming server
    Naming {
        /// Address of the client-facing service interface
        #[structopt(long, default_value = "0.0.0.0:6000")]
        service: SocketAddr,
        /// Address of the storage-server registration interface
        #[structopt(long, default_value = "0.0.0.0:6001")]
        registration: SocketAddr,
    },
    /// Run a storage server serving a local directory
    Storage {
        /// Directory whose files are served
        #[structopt(parse(from_os_str))]
        root: PathBuf,
        /// Naming server host
        #[structopt(long, default_value = "127.0.0.1")]
        naming: String,
        /// Host name under which clients reach this server
        #[structopt(long, default_value = "127.0.0.1")]
        hostname: String,
        #[structopt(long, default_value = "0")]
        storage_port: u16,
        #[structopt(long, default_value = "0")]
        command_port: u16,
    },
    /// List a directory
    Ls {
        #[structopt(long, default_value = "127.0.0.1")]
        naming: String,
        #[structopt(default_value = "/")]
        path: Path,
    },
    /// Create a directory
    Mkdir {
        #[structopt(long, default_value = "127.0.0.1")]
        naming: String,
        path: Path,
    },
    /// Create an empty file
    Touch {
        #[structopt(long, default_value = "127.0.0.1")]
        naming: String,
        path: Path,
    },
    /// Delete a file or directory
    Rm {
        #[structopt(long, default_value = "127.0.0.1")]
        naming: String,
        path: Path,
    },
    /// Show whether a path is a directory, and the size and location of files
    Stat {
        #[structopt(long, default_value = "127.0.0.1")]
        naming: String,
        path: Path,
    },
    /// Print a file to stdout
    Cat {
        #[structopt(long, default_value = "127.0.0.1")]
        naming: String,
        path: Path,
    },
    /// Copy a local file into the filesystem as a new file
    Put {
        #[structopt(long, default_value = "127.0.0.1")]
        naming: String,
        #[structopt(parse(from_os_str))]
        local: PathBuf,
        path: Path,
    },
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, Box<dyn Error>> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("cannot resolve {}", host).into())
}

fn service(host: &str) -> Result<ServiceStub, Box<dyn Error>> {
    Ok(Stub::new(resolve(host, SERVICE_PORT)?)?)
}

/// Creates `path` and fills it with `data`. Existing files are never
/// overwritten.
fn put(service: &dyn Service, path: &Path, data: &[u8]) -> Result<StorageStub, Box<dyn Error>> {
    if !service.create_file(path)? {
        return Err(format!("{} already exists", path).into());
    }
    let storage = service.get_storage(path)?;
    storage.write(path, 0, data)?;
    Ok(storage)
}

fn park() -> ! {
    loop {
        thread::park();
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;

    match Opt::from_args() {
        Opt::Naming {
            service,
            registration,
        } => {
            let server = NamingServer::new(NamingConfig {
                service,
                registration,
            })?;
            server.start()?;
            park();
        }
        Opt::Storage {
            root,
            naming,
            hostname,
            storage_port,
            command_port,
        } => {
            let naming: RegistrationStub = Stub::new(resolve(&naming, REGISTRATION_PORT)?)?;
            let server = StorageServer::new(StorageConfig {
                root,
                hostname,
                storage_port,
                command_port,
            })?;
            server.start(&naming)?;
            let (storage, _) = server.stubs()?;
            info!("serving {} as {}", server.root().display(), storage);
            park();
        }
        Opt::Ls { naming, path } => {
            for name in service(&naming)?.list(&path)? {
                println!("{}", name);
            }
        }
        Opt::Mkdir { naming, path } => {
            if !service(&naming)?.create_directory(&path)? {
                return Err(format!("{} already exists", path).into());
            }
        }
        Opt::Touch { naming, path } => {
            if !service(&naming)?.create_file(&path)? {
                return Err(format!("{} already exists", path).into());
            }
        }
        Opt::Rm { naming, path } => {
            if !service(&naming)?.delete(&path)? {
                return Err(format!("cannot delete {}", path).into());
            }
        }
        Opt::Stat { naming, path } => {
            let service = service(&naming)?;
            if service.is_directory(&path)? {
                println!("{}: directory", path);
            } else {
                let storage = service.get_storage(&path)?;
                println!("{}: file, {} bytes on {}", path, storage.size(&path)?, storage);
            }
        }
        Opt::Cat { naming, path } => {
            let storage = service(&naming)?.get_storage(&path)?;
            let data = storage.read(&path, 0, storage.size(&path)?)?;
            io::stdout().write_all(&data)?;
        }
        Opt::Put {
            naming,
            local,
            path,
        } => {
            let data = fs::read(&local)?;
            let storage = put(&service(&naming)?, &path, &data)?;
            info!("wrote {} bytes to {} on {}", data.len(), path, storage);
        }
    }
    Ok(())
}
