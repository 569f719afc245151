//! Recognized environment options (§6.2): this node process is configured
//! entirely from the environment, mirroring the original's own
//! environment-variable-driven `create_node_config`/`create_cluster_config`
//! (no `original_source` file for this survives in the retrieved pack, so
//! the variable names and address-string format come straight from
//! spec.md's own enumeration).

use base::{err, Error};
use std::net::SocketAddr;
use std::path::PathBuf;

/// One node's view of its own configuration, parsed once at process start.
pub struct ClusterConfig {
    pub node_name: String,
    pub node_name_seq: String,
    pub repository_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub data_reader_address: SocketAddr,
    pub data_writer_address: SocketAddr,
    pub anti_entropy_address: SocketAddr,
    pub handoff_address: SocketAddr,
    pub client_pipeline_address: SocketAddr,
    /// Every node's anti-entropy address in `NODE_NAME_SEQ` order, this
    /// node's own slot included, so the auditor driver can broadcast a
    /// `consistency-check` to each peer (§2).
    pub anti_entropy_peer_addresses: Vec<SocketAddr>,
    /// Every node's handoff address in `NODE_NAME_SEQ` order (§4.4's sweep
    /// broadcasting `hinted-handoff`/`purge-handoff`).
    pub handoff_peer_addresses: Vec<SocketAddr>,
    /// Every node's data-reader address in `NODE_NAME_SEQ` order, sourced
    /// from the supplemental `DATA_READER_ADDRESSES` variable (not named by
    /// spec.md, which only gives this node's own `DATA_READER_ADDRESS`; a
    /// handoff forwarder needs a *peer's* reader address to retrieve a
    /// segment off of it, and no other env var carries that list). Empty
    /// when the variable is unset, in which case the handoff sweep has
    /// nowhere to retrieve from and simply never starts one.
    pub reader_peer_addresses: Vec<SocketAddr>,
}

impl ClusterConfig {
    pub fn from_env() -> Result<Self, Error> {
        let node_name = require_env("NODE_NAME")?;
        let node_name_seq = require_env("NODE_NAME_SEQ")?;
        let local_index = node_names(&node_name_seq)
            .iter()
            .position(|n| n == &node_name)
            .ok_or_else(|| err("NODE_NAME is not present in NODE_NAME_SEQ"))?;

        let anti_entropy_server_addresses = require_env("ANTI_ENTROPY_SERVER_ADDRESSES")?;
        let handoff_server_addresses = require_env("HANDOFF_SERVER_ADDRESSES")?;
        let anti_entropy_peer_addresses = all_addresses(&anti_entropy_server_addresses)?;
        let handoff_peer_addresses = all_addresses(&handoff_server_addresses)?;
        let reader_peer_addresses = match std::env::var("DATA_READER_ADDRESSES").ok() {
            Some(raw) => all_addresses(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            repository_path: PathBuf::from(require_env("REPOSITORY_PATH")?),
            log_dir: std::env::var("LOG_DIR").ok().map(PathBuf::from),
            data_reader_address: parse_address(&require_env("DATA_READER_ADDRESS")?)?,
            data_writer_address: parse_address(&require_env("DATA_WRITER_ADDRESS")?)?,
            anti_entropy_address: nth_address(&anti_entropy_server_addresses, local_index)?,
            handoff_address: nth_address(&handoff_server_addresses, local_index)?,
            client_pipeline_address: parse_address(&require_env("CLIENT_PIPELINE_ADDRESS")?)?,
            anti_entropy_peer_addresses,
            handoff_peer_addresses,
            reader_peer_addresses,
            node_name,
            node_name_seq,
        })
    }

    /// This node's position in `NODE_NAME_SEQ`, matching the index every
    /// peer address list is keyed by.
    pub fn local_index(&self) -> usize {
        node_names(&self.node_name_seq)
            .iter()
            .position(|n| *n == self.node_name)
            .expect("node_name was validated against node_name_seq in from_env")
    }

    pub fn peer_node_names(&self) -> Vec<String> {
        node_names(&self.node_name_seq).into_iter().map(String::from).collect()
    }

    /// This node colocates its local metadata database with its value-file
    /// repository; spec.md's environment list names no separate variable
    /// for it, so `REPOSITORY_PATH/local_index.db` is the chosen default.
    pub fn local_db_path(&self) -> PathBuf {
        self.repository_path.join("local_index.db")
    }
}

fn require_env(name: &str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| err(format!("missing required environment variable {name}")))
}

fn node_names(node_name_seq: &str) -> Vec<&str> {
    node_name_seq.split_whitespace().collect()
}

/// Addresses are `transport://host:port` strings (§6.2); the scheme is a
/// label carried over from the original's pluggable transport naming and
/// has no effect once stripped, since this rewrite always speaks real TCP.
fn parse_address(raw: &str) -> Result<SocketAddr, Error> {
    let host_port = raw.strip_prefix("transport://").unwrap_or(raw);
    host_port
        .parse()
        .map_err(|_| err(format!("malformed transport address: {raw}")))
}

fn nth_address(space_separated: &str, index: usize) -> Result<SocketAddr, Error> {
    let raw = space_separated
        .split_whitespace()
        .nth(index)
        .ok_or_else(|| err("address list shorter than NODE_NAME_SEQ"))?;
    parse_address(raw)
}

fn all_addresses(space_separated: &str) -> Result<Vec<SocketAddr>, Error> {
    space_separated.split_whitespace().map(parse_address).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;
    use test_log::test;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn set(key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    fn clear_all() {
        for key in [
            "NODE_NAME",
            "NODE_NAME_SEQ",
            "REPOSITORY_PATH",
            "LOG_DIR",
            "DATA_READER_ADDRESS",
            "DATA_READER_ADDRESSES",
            "DATA_WRITER_ADDRESS",
            "ANTI_ENTROPY_SERVER_ADDRESSES",
            "HANDOFF_SERVER_ADDRESSES",
            "CLIENT_PIPELINE_ADDRESS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn picks_this_nodes_own_slot_out_of_parallel_address_lists() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        set("NODE_NAME", "node02");
        set("NODE_NAME_SEQ", "node01 node02 node03");
        set("REPOSITORY_PATH", "/tmp/repo");
        set("DATA_READER_ADDRESS", "transport://127.0.0.1:9101");
        set("DATA_WRITER_ADDRESS", "transport://127.0.0.1:9102");
        set(
            "ANTI_ENTROPY_SERVER_ADDRESSES",
            "transport://127.0.0.1:9201 transport://127.0.0.1:9202 transport://127.0.0.1:9203",
        );
        set(
            "HANDOFF_SERVER_ADDRESSES",
            "transport://127.0.0.1:9301 transport://127.0.0.1:9302 transport://127.0.0.1:9303",
        );
        set("CLIENT_PIPELINE_ADDRESS", "transport://127.0.0.1:9401");

        let config = ClusterConfig::from_env().unwrap();
        assert_eq!(config.anti_entropy_address.port(), 9202);
        assert_eq!(config.handoff_address.port(), 9302);
        assert_eq!(config.local_db_path(), PathBuf::from("/tmp/repo/local_index.db"));
        clear_all();
    }

    #[test]
    fn rejects_node_name_absent_from_sequence() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        set("NODE_NAME", "node99");
        set("NODE_NAME_SEQ", "node01 node02");
        set("REPOSITORY_PATH", "/tmp/repo");
        assert!(ClusterConfig::from_env().is_err());
        clear_all();
    }
}
