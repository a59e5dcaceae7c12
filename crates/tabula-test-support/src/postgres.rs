//! Disposable `PostgreSQL` databases for integration tests.
//!
//! An external server named by `TABULA_TEST_DATABASE_URL` is preferred; each
//! call creates and later drops a uniquely named database on it. Without
//! one, a throwaway server is started from local `initdb`/`postgres`
//! binaries.

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use postgres::NoTls;
use url::Url;

use crate::fixtures::external_database_url;

/// Handle to a disposable database; dropped along with the handle.
pub struct TestDatabase {
    connection_string: String,
    owned: Option<DatabaseName>,
    server: Option<LocalServer>,
}

impl TestDatabase {
    /// Connection string for the disposable database.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        if let Some(owned) = &self.owned {
            let _ = run_admin(
                &owned.admin_url,
                format!("DROP DATABASE IF EXISTS \"{}\"", owned.name),
            );
        }
        if let Some(server) = &mut self.server {
            let _ = server.process.kill();
            let _ = server.process.wait();
            let _ = fs::remove_dir_all(&server.data_dir);
        }
    }
}

struct DatabaseName {
    admin_url: String,
    name: String,
}

struct LocalServer {
    process: Child,
    data_dir: PathBuf,
}

/// Provision a fresh database.
///
/// # Errors
///
/// Returns an error when neither an external server nor local binaries are
/// usable; callers typically skip the test in that case.
pub fn start_postgres() -> Result<TestDatabase> {
    if let Some(url) = external_database_url() {
        let (connection_string, owned) = create_unique_database(&url)?;
        return Ok(TestDatabase {
            connection_string,
            owned: Some(owned),
            server: None,
        });
    }

    let (server, port) = start_local_server()?;
    let base_url = format!("postgres://postgres@127.0.0.1:{port}/postgres");
    let mut database = TestDatabase {
        connection_string: String::new(),
        owned: None,
        server: Some(server),
    };
    let (connection_string, owned) = create_unique_database(&base_url)?;
    database.connection_string = connection_string;
    database.owned = Some(owned);
    Ok(database)
}

fn start_local_server() -> Result<(LocalServer, u16)> {
    let initdb = find_binary("initdb")?;
    let postgres = find_binary("postgres")?;
    let pg_isready = find_binary("pg_isready")?;

    let data_dir = fresh_data_dir()?;
    let data_arg = data_dir
        .to_str()
        .context("data dir contains non-utf8 characters")?
        .to_string();

    let status = Command::new(&initdb)
        .args(["-D", &data_arg, "--username=postgres", "--auth=trust"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("failed to run initdb")?;
    if !status.success() {
        let _ = fs::remove_dir_all(&data_dir);
        bail!("initdb exited with failure status");
    }

    let port = free_port()?;
    let process = Command::new(&postgres)
        .args(["-D", &data_arg, "-p", &port.to_string(), "-h", "127.0.0.1"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to start postgres process")?;
    let mut server = LocalServer { process, data_dir };

    if let Err(err) = wait_until_ready(&pg_isready, port) {
        let _ = server.process.kill();
        let _ = server.process.wait();
        let _ = fs::remove_dir_all(&server.data_dir);
        return Err(err);
    }
    Ok((server, port))
}

fn find_binary(name: &str) -> Result<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map_or_else(Vec::new, |paths| std::env::split_paths(&paths).collect());
    dirs.extend(
        [
            "/usr/lib/postgresql/16/bin",
            "/usr/local/opt/postgresql@16/bin",
            "/opt/homebrew/opt/postgresql@16/bin",
        ]
        .into_iter()
        .map(PathBuf::from),
    );

    dirs.into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| anyhow!("{name} binary is required for Postgres tests"))
}

fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("failed to reserve port")?;
    Ok(listener
        .local_addr()
        .context("failed to read listener address")?
        .port())
}

fn fresh_data_dir() -> Result<PathBuf> {
    let base = std::env::temp_dir().join("tabula-pg");
    fs::create_dir_all(&base)
        .with_context(|| format!("failed to create base dir {}", base.display()))?;
    let dir = base.join(unique_suffix());
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    Ok(dir)
}

fn wait_until_ready(pg_isready: &Path, port: u16) -> Result<()> {
    for _ in 0..50 {
        let ready = Command::new(pg_isready)
            .args(["-h", "127.0.0.1", "-p", &port.to_string(), "-U", "postgres"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success());
        if ready {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(200));
    }
    bail!("postgres process did not become ready in time")
}

fn create_unique_database(base_url: &str) -> Result<(String, DatabaseName)> {
    let parsed = Url::parse(base_url).context("invalid postgres connection url")?;
    let name = format!("tabula_test_{}", unique_suffix());

    let mut target = parsed.clone();
    target.set_path(&format!("/{name}"));

    let mut admin = parsed.clone();
    admin.set_path("/postgres");
    let mut candidates = vec![admin.to_string()];
    if admin.path() != parsed.path() {
        candidates.push(parsed.to_string());
    }

    let mut last_error = None;
    for admin_url in candidates {
        match run_admin(&admin_url, format!("CREATE DATABASE \"{name}\"")) {
            Ok(()) => {
                return Ok((target.to_string(), DatabaseName { admin_url, name }));
            }
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow!("failed to create database")))
}

/// Run one statement on a dedicated thread; the blocking client must not
/// run inside an async runtime.
fn run_admin(admin_url: &str, statement: String) -> Result<()> {
    let admin_url = admin_url.to_string();
    thread::spawn(move || -> Result<()> {
        let config = postgres::Config::from_str(&admin_url)?;
        let mut client = config.connect(NoTls)?;
        client
            .simple_query(&statement)
            .map(|_| ())
            .with_context(|| format!("failed to run `{statement}`"))
    })
    .join()
    .unwrap_or_else(|_| Err(anyhow!("admin statement thread panicked")))
}

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}_{nanos}", std::process::id())
}
