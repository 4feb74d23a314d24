use crate::config::HostKeyPolicy;
use crate::error::SshError;
use hmac::{Hmac, Mac};
use russh::keys::ssh_key::known_hosts::{Entry, HostPatterns, KnownHosts as KnownHostsFile, Marker};
use russh::keys::PublicKey;
use sha1::Sha1;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownHostResult {
    Match,
    Mismatch,
    NotFound,
    Revoked,
}

impl KnownHosts {
    pub fn load(path: PathBuf) -> Result<Self, SshError> {
        let entries = if path.exists() {
            KnownHostsFile::read_file(&path).map_err(|e| {
                SshError::Protocol(format!("known_hosts {}: {e}", path.display()))
            })?
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> KnownHostResult {
        let target = host_pattern(host, port);
        let mut result = KnownHostResult::NotFound;
        for entry in &self.entries {
            if !entry_matches(entry.host_patterns(), &target) {
                continue;
            }
            let same_key = entry.public_key().key_data() == key.key_data();
            if entry.marker() == Some(&Marker::Revoked) {
                if same_key {
                    return KnownHostResult::Revoked;
                }
                continue;
            }
            if same_key {
                return KnownHostResult::Match;
            }
            result = KnownHostResult::Mismatch;
        }
        result
    }

    pub fn verify(
        &mut self,
        host: &str,
        port: u16,
        key: &PublicKey,
        policy: &HostKeyPolicy,
    ) -> Result<bool, SshError> {
        match (self.check(host, port, key), policy) {
            (_, HostKeyPolicy::InsecureAcceptAny) => {
                warn!(host = %host, port, "accepting host key without verification");
                Ok(true)
            }
            (KnownHostResult::Match, _) => Ok(true),
            (KnownHostResult::NotFound, HostKeyPolicy::AcceptNew) => {
                self.add(host, port, key)?;
                info!(host = %host, port, path = %self.path.display(), "learned new host key");
                Ok(true)
            }
            (KnownHostResult::NotFound, HostKeyPolicy::Strict) => {
                warn!(host = %host, port, "unknown host key rejected by strict policy");
                Ok(false)
            }
            (result, _) => {
                warn!(host = %host, port, ?result, "host key rejected");
                Ok(false)
            }
        }
    }

    pub fn add(&mut self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = key
            .to_openssh()
            .map_err(|e| SshError::Protocol(format!("encode host key: {e}")))?;
        let line = format!("{} {}\n", host_pattern(host, port), encoded);
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(line.as_bytes())?;
        self.entries = KnownHostsFile::read_file(&self.path)
            .map_err(|e| SshError::Protocol(format!("known_hosts reload: {e}")))?;
        Ok(())
    }
}

fn host_pattern(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

fn entry_matches(patterns: &HostPatterns, target: &str) -> bool {
    match patterns {
        HostPatterns::Patterns(list) => plain_patterns_match(list, target),
        HostPatterns::HashedName { salt, hash } => hashed_name(salt, target)
            .map(|computed| &computed == hash)
            .unwrap_or(false),
    }
}

fn plain_patterns_match(patterns: &[String], target: &str) -> bool {
    let mut matched = false;
    for pattern in patterns {
        match pattern.strip_prefix('!') {
            Some(negated) if glob_match(negated, target) => return false,
            Some(_) => {}
            None => matched |= glob_match(pattern, target),
        }
    }
    matched
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c.eq_ignore_ascii_case(&text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, resume)) => {
                    p = star + 1;
                    t = resume + 1;
                    backtrack = Some((star, resume + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == b'*')
}

fn hashed_name(salt: &[u8], target: &str) -> Option<[u8; 20]> {
    let mut mac = Hmac::<Sha1>::new_from_slice(salt).ok()?;
    mac.update(target.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    Some(out)
}
