//! Shared implementation of the organisation key tools
//!
//! `orgsig` and `orggensign` both load (or generate) an organisation
//! keypair, optionally persist it and optionally sign a peer's public
//! key. They differ in one rule: `orgsig` refuses to generate a key it
//! would not save.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser;

use vigilmesh_crypto::{orgsig, Identity};
use vigilmesh_protocol::PeerId;

#[derive(Parser, Debug)]
pub struct OrgToolArgs {
    /// Path to a file with the organisation private key. If not set, a
    /// new key is generated.
    #[arg(long = "load-key-path")]
    pub load_key_path: Option<PathBuf>,

    /// Where to save the organisation private key.
    #[arg(long = "save-key-path")]
    pub save_key_path: Option<PathBuf>,

    /// Sign a peer id. Use --peer-id to pass it, otherwise it is read
    /// from standard input.
    #[arg(long = "sign-peer")]
    pub sign_peer: bool,

    /// Public id of the peer to sign (hex). Only valid together with
    /// --sign-peer.
    #[arg(long = "peer-id")]
    pub peer_id: Option<String>,
}

/// Run one of the key tools. Returns the process exit code.
pub fn run(tool: &str, args: OrgToolArgs, require_save_on_generate: bool) -> i32 {
    println!("Running {tool}\n");

    if args.save_key_path.is_none() && !args.sign_peer {
        eprintln!(
            "Nothing to do. At least one of 'save-key-path' or 'sign-peer' flags must be set. \
             Run '--help' for more information"
        );
        return 1;
    }

    if let Err(e) = vigilmesh_crypto::init() {
        eprintln!("{e}");
        return 2;
    }

    let key = if let Some(path) = &args.load_key_path {
        match Identity::load(path) {
            Ok(key) => key,
            Err(e) => {
                eprintln!("failed to load organisation key: {e}");
                return 2;
            }
        }
    } else {
        if require_save_on_generate && args.save_key_path.is_none() {
            eprintln!("--save-key-path must be set when generating a new organisation key");
            return 2;
        }
        match Identity::generate() {
            Ok(key) => key,
            Err(e) => {
                eprintln!("failed to generate organisation key: {e}");
                return 2;
            }
        }
    };

    let mut signature = None;
    if args.sign_peer {
        let peer = match peer_to_sign(args.peer_id.as_deref()) {
            Ok(peer) => peer,
            Err(e) => {
                eprintln!("{e}");
                return 4;
            }
        };
        signature = Some(orgsig::sign_peer(&key, &peer));
    }

    if let Some(sig) = &signature {
        println!("Peer's signature:\n\t{sig}\n");
    }

    if let Some(path) = &args.save_key_path {
        if let Err(e) = key.save(path) {
            eprintln!("failed to save organisation key: {e}");
            return 6;
        }
        println!("Saved organisation private key to:\n\t{}\n", path.display());
    }

    println!(
        "Organisation's ID (public key), usable as a trusted org in peer configuration:\n\t{}\n",
        orgsig::org_id_of(&key)
    );
    println!("Finished...");
    0
}

fn peer_to_sign(arg: Option<&str>) -> Result<PeerId, String> {
    let raw = match arg {
        Some(raw) => raw.to_string(),
        None => read_peer_id_from_stdin().map_err(|e| format!("failed to read peer id: {e}"))?,
    };
    PeerId::from_hex(raw.trim()).map_err(|_| format!("invalid peer id '{}'", raw.trim()))
}

fn read_peer_id_from_stdin() -> std::io::Result<String> {
    println!("Peer ID to sign:");
    print!("> ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_to_do() {
        let args = OrgToolArgs {
            load_key_path: None,
            save_key_path: None,
            sign_peer: false,
            peer_id: None,
        };
        assert_eq!(run("orgsig", args, true), 1);
    }

    #[test]
    fn test_generate_requires_save_when_strict() {
        let args = OrgToolArgs {
            load_key_path: None,
            save_key_path: None,
            sign_peer: true,
            peer_id: Some("aa".repeat(32)),
        };
        assert_eq!(run("orgsig", args, true), 2);
    }

    #[test]
    fn test_sign_peer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("org.key");
        let peer = Identity::generate().unwrap();

        // Generate, save and sign in one go (lenient mode).
        let args = OrgToolArgs {
            load_key_path: None,
            save_key_path: Some(key_path.clone()),
            sign_peer: true,
            peer_id: Some(peer.peer_id().to_hex()),
        };
        assert_eq!(run("orggensign", args, false), 0);

        // Reload the key and verify a fresh signature by hand.
        let org = Identity::load(&key_path).unwrap();
        let sig = orgsig::sign_peer(&org, &peer.peer_id());
        assert!(orgsig::verify_peer(
            &orgsig::org_id_of(&org),
            &peer.public_key_bytes(),
            &sig
        )
        .unwrap());
    }

    #[test]
    fn test_bad_peer_id() {
        let args = OrgToolArgs {
            load_key_path: None,
            save_key_path: None,
            sign_peer: true,
            peer_id: Some("not-hex".to_string()),
        };
        assert_eq!(run("orggensign", args, false), 4);
    }
}
