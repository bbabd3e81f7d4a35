//! Cuckoo-cycle proof-of-work login challenge.
//!
//! The client must find a 42-cycle in a pseudorandom bipartite graph of a
//! million nodes. Graph edges come from SipHash-2-4 keyed off a server
//! prefix; admitting only a fraction of the nonce space (the easiness)
//! makes a cycle rare enough that finding one costs deliberate CPU time,
//! while verification stays a few thousand hashes. Memory dominates the
//! solve, which keeps GPU farms from trivializing it.
//!
//! When a key yields no cycle the client appends an incrementing iteration
//! index to the prefix and tries again, bounded by the configured
//! iteration cap.

use std::collections::HashSet;

use farsight_wire::{BinaryReader, BinaryWriter};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use super::{ChallengeFactory, LoginChallenge};
use crate::error::LoginError;

pub const CHALLENGE_TYPE: &str = "cuckoo_cycle";

const SIZE_SHIFT: u32 = 20;
const SIZE: u64 = 1 << SIZE_SHIFT;
const HALF_SIZE: u64 = SIZE / 2;
const NODE_MASK: u64 = HALF_SIZE - 1;
pub const PROOF_SIZE: usize = 42;
const MAX_PATH_LEN: usize = 8192;
const PREFIX_LEN: usize = 16;

#[derive(Debug, Clone, Copy)]
struct SipKeys {
    k0: u64,
    k1: u64,
}

/// Derives SipHash keys from an arbitrary header string.
fn keys_for(header: &str) -> SipKeys {
    let digest = blake3::hash(header.as_bytes());
    let b = digest.as_bytes();
    let lo = u64::from_le_bytes(b[0..8].try_into().unwrap_or([0; 8]));
    let hi = u64::from_le_bytes(b[8..16].try_into().unwrap_or([0; 8]));
    SipKeys {
        k0: lo ^ 0x736f6d6570736575,
        k1: hi ^ 0x646f72616e646f6d,
    }
}

/// SipHash-2-4 of one 8-byte little-endian block.
fn siphash24(keys: SipKeys, nonce: u64) -> u64 {
    let mut v0 = keys.k0 ^ 0x736f6d6570736575;
    let mut v1 = keys.k1 ^ 0x646f72616e646f6d;
    let mut v2 = keys.k0 ^ 0x6c7967656e657261;
    let mut v3 = keys.k1 ^ 0x7465646279746573;

    macro_rules! sipround {
        () => {
            v0 = v0.wrapping_add(v1);
            v1 = v1.rotate_left(13);
            v1 ^= v0;
            v0 = v0.rotate_left(32);
            v2 = v2.wrapping_add(v3);
            v3 = v3.rotate_left(16);
            v3 ^= v2;
            v0 = v0.wrapping_add(v3);
            v3 = v3.rotate_left(21);
            v3 ^= v0;
            v2 = v2.wrapping_add(v1);
            v1 = v1.rotate_left(17);
            v1 ^= v2;
            v2 = v2.rotate_left(32);
        };
    }

    v3 ^= nonce;
    sipround!();
    sipround!();
    v0 ^= nonce;
    v2 ^= 0xff;
    sipround!();
    sipround!();
    sipround!();
    sipround!();
    v0 ^ v1 ^ v2 ^ v3
}

/// Node index in one half of the bipartite graph for an edge nonce.
fn sip_node(keys: SipKeys, nonce: u64, uorv: u64) -> u64 {
    siphash24(keys, 2 * nonce + uorv) & NODE_MASK
}

/// Walks a cuckoo path to its root, recording visited nodes.
/// Returns `None` when the path exceeds the bound (abandon this nonce).
fn path(cuckoo: &[u64], mut u: u64, us: &mut [u64; MAX_PATH_LEN]) -> Option<usize> {
    let mut nu = 0usize;
    while u != 0 {
        nu += 1;
        if nu >= MAX_PATH_LEN {
            return None;
        }
        us[nu] = u;
        u = cuckoo[u as usize];
    }
    Some(nu)
}

/// Recovers the nonces forming the found cycle.
fn solution(
    keys: SipKeys,
    max_nonce: u64,
    us: &[u64; MAX_PATH_LEN],
    nu: usize,
    vs: &[u64; MAX_PATH_LEN],
    nv: usize,
) -> Vec<u32> {
    let mut cycle: HashSet<(u64, u64)> = HashSet::with_capacity(PROOF_SIZE);
    cycle.insert((us[0], vs[0]));
    for k in (0..nu).rev() {
        // u-layer nodes sit at even path indices.
        cycle.insert((us[(k + 1) & !1], us[k | 1]));
    }
    for k in (0..nv).rev() {
        // v-path starts on the v layer, so the parities flip.
        cycle.insert((vs[k | 1], vs[(k + 1) & !1]));
    }

    let mut proof = Vec::with_capacity(PROOF_SIZE);
    for nonce in 0..max_nonce {
        let edge = (
            1 + sip_node(keys, nonce, 0),
            1 + HALF_SIZE + sip_node(keys, nonce, 1),
        );
        if cycle.remove(&edge) {
            proof.push(nonce as u32);
        }
    }
    proof
}

/// Attempts to find a 42-cycle among the first `max_nonce` edges.
fn solve_graph(keys: SipKeys, max_nonce: u64) -> Option<Vec<u32>> {
    let mut cuckoo = vec![0u64; 1 + SIZE as usize];
    let mut us = Box::new([0u64; MAX_PATH_LEN]);
    let mut vs = Box::new([0u64; MAX_PATH_LEN]);

    for nonce in 0..max_nonce {
        let u0 = 1 + sip_node(keys, nonce, 0);
        let v0 = 1 + HALF_SIZE + sip_node(keys, nonce, 1);
        let u = cuckoo[u0 as usize];
        let v = cuckoo[v0 as usize];
        us[0] = u0;
        vs[0] = v0;

        let (Some(mut nu), Some(mut nv)) =
            (path(&cuckoo, u, &mut us), path(&cuckoo, v, &mut vs))
        else {
            continue;
        };

        if us[nu] == vs[nv] {
            // Both paths reach the same root: adding this edge closes a
            // cycle. Find the junction to measure its length.
            let min = nu.min(nv);
            nu -= min;
            nv -= min;
            while us[nu] != vs[nv] {
                nu += 1;
                nv += 1;
            }
            let len = nu + nv + 1;
            if len == PROOF_SIZE {
                let proof = solution(keys, max_nonce, &us, nu, &vs, nv);
                if proof.len() == PROOF_SIZE {
                    return Some(proof);
                }
            }
            continue;
        }

        // No cycle: reverse the shorter path and join the trees.
        if nu < nv {
            for k in (0..nu).rev() {
                cuckoo[us[k + 1] as usize] = us[k];
            }
            cuckoo[u0 as usize] = v0;
        } else {
            for k in (0..nv).rev() {
                cuckoo[vs[k + 1] as usize] = vs[k];
            }
            cuckoo[v0 as usize] = u0;
        }
    }
    None
}

/// Checks a proof against the graph for `keys`.
fn verify_proof(keys: SipKeys, proof: &[u32], max_nonce: u64) -> bool {
    if proof.len() != PROOF_SIZE {
        return false;
    }
    let mut us = [0u64; PROOF_SIZE];
    let mut vs = [0u64; PROOF_SIZE];
    for (i, &nonce) in proof.iter().enumerate() {
        if u64::from(nonce) >= max_nonce {
            return false;
        }
        if i > 0 && nonce <= proof[i - 1] {
            return false;
        }
        us[i] = 1 + sip_node(keys, nonce.into(), 0);
        vs[i] = 1 + HALF_SIZE + sip_node(keys, nonce.into(), 1);
    }

    // The edges must chain into a single cycle through edge 0,
    // alternating v-side and u-side matches.
    let mut i = 0usize;
    let mut remaining = PROOF_SIZE;
    loop {
        // Hop across the shared v node.
        let mut j = i;
        for k in 0..PROOF_SIZE {
            if k != i && vs[k] == vs[i] {
                if j != i {
                    return false; // three edges on one node
                }
                j = k;
            }
        }
        if j == i {
            return false; // dead end
        }
        i = j;
        remaining -= 1;
        if i == 0 {
            break;
        }
        if remaining == 0 {
            return false;
        }

        // Hop across the shared u node.
        let mut j = i;
        for k in 0..PROOF_SIZE {
            if k != i && us[k] == us[i] {
                if j != i {
                    return false;
                }
                j = k;
            }
        }
        if j == i {
            return false;
        }
        i = j;
        remaining -= 1;
        if i == 0 {
            break;
        }
        if remaining == 0 {
            return false;
        }
    }
    remaining == 0
}

/// A cuckoo-cycle challenge instance.
///
/// Wire parameters are `{prefix, max_nonce}`; the response is the derived
/// key (prefix plus iteration index) and the 42 cycle nonces in ascending
/// order.
pub struct CuckooCycleChallenge {
    prefix: String,
    max_nonce: u64,
    max_solve_iterations: u32,
    solution: Option<(String, Vec<u32>)>,
}

impl LoginChallenge for CuckooCycleChallenge {
    fn challenge_type(&self) -> &'static str {
        CHALLENGE_TYPE
    }

    fn write_challenge(&self, w: &mut BinaryWriter) -> Result<(), LoginError> {
        w.write_string(&self.prefix);
        w.write_u64(self.max_nonce);
        Ok(())
    }

    fn solve(&mut self) -> Result<(), LoginError> {
        for iteration in 0..self.max_solve_iterations {
            let key = format!("{}{}", self.prefix, iteration);
            if let Some(proof) = solve_graph(keys_for(&key), self.max_nonce) {
                debug!(
                    "cuckoo cycle solved after {} iteration(s)",
                    iteration + 1
                );
                self.solution = Some((key, proof));
                return Ok(());
            }
        }
        Err(LoginError::ChallengeUnsolvable)
    }

    fn write_response(&self, w: &mut BinaryWriter) -> Result<(), LoginError> {
        let (key, proof) = self
            .solution
            .as_ref()
            .ok_or(LoginError::ChallengeUnsolvable)?;
        w.write_string(key);
        for nonce in proof {
            w.write_u32(*nonce);
        }
        Ok(())
    }

    fn verify_response(&self, r: &mut BinaryReader<'_>) -> Result<bool, LoginError> {
        let key = r.read_string()?;
        let mut proof = Vec::with_capacity(PROOF_SIZE);
        for _ in 0..PROOF_SIZE {
            proof.push(r.read_u32()?);
        }

        // The key must be our prefix plus a bare iteration index.
        let Some(suffix) = key.strip_prefix(&self.prefix) else {
            return Ok(false);
        };
        if suffix.parse::<u64>().is_err() {
            return Ok(false);
        }
        Ok(verify_proof(keys_for(&key), &proof, self.max_nonce))
    }
}

/// Issues cuckoo-cycle challenges at a configured easiness.
pub struct CuckooCycleFactory {
    easiness: f32,
    max_solve_iterations: u32,
}

impl CuckooCycleFactory {
    pub fn new(easiness: f32, max_solve_iterations: u32) -> Self {
        Self {
            easiness: if easiness > 0.0 && easiness <= 100.0 {
                easiness
            } else {
                50.0
            },
            max_solve_iterations: max_solve_iterations.max(1),
        }
    }

    fn max_nonce(&self) -> u64 {
        ((self.easiness as f64 / 100.0) * SIZE as f64) as u64
    }
}

impl ChallengeFactory for CuckooCycleFactory {
    fn challenge_type(&self) -> &'static str {
        CHALLENGE_TYPE
    }

    fn create(&self) -> Box<dyn LoginChallenge> {
        let prefix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PREFIX_LEN)
            .map(char::from)
            .collect();
        Box::new(CuckooCycleChallenge {
            prefix,
            max_nonce: self.max_nonce(),
            max_solve_iterations: self.max_solve_iterations,
            solution: None,
        })
    }

    fn read(&self, r: &mut BinaryReader<'_>) -> Result<Box<dyn LoginChallenge>, LoginError> {
        let prefix = r.read_string()?;
        let max_nonce = r.read_u64()?;
        Ok(Box::new(CuckooCycleChallenge {
            prefix,
            max_nonce: max_nonce.min(SIZE),
            max_solve_iterations: self.max_solve_iterations,
            solution: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solved_pair() -> (Box<dyn LoginChallenge>, Vec<u8>) {
        let factory = CuckooCycleFactory::new(50.0, 10_000);
        let server = factory.create();
        let mut w = BinaryWriter::new();
        server.write_challenge(&mut w).unwrap();
        let bytes = w.into_bytes();

        let mut r = BinaryReader::new(&bytes);
        let mut client = factory.read(&mut r).unwrap();
        client.solve().unwrap();
        let mut resp = BinaryWriter::new();
        client.write_response(&mut resp).unwrap();
        (server, resp.into_bytes())
    }

    #[test]
    fn test_solve_and_verify_round_trip() {
        let (server, response) = solved_pair();
        let mut r = BinaryReader::new(&response);
        assert!(server.verify_response(&mut r).unwrap());
    }

    #[test]
    fn test_corrupted_nonce_rejected() {
        let (server, mut response) = solved_pair();
        // Perturb one nonce in the middle of the proof.
        let nonce_region = response.len() - PROOF_SIZE * 4;
        response[nonce_region + 20 * 4] ^= 0x01;
        let mut r = BinaryReader::new(&response);
        assert!(!server.verify_response(&mut r).unwrap());
    }

    #[test]
    fn test_foreign_prefix_rejected() {
        let factory = CuckooCycleFactory::new(50.0, 10_000);
        let (_, response) = solved_pair();
        // A different server instance has a different prefix.
        let other = factory.create();
        let mut r = BinaryReader::new(&response);
        assert!(!other.verify_response(&mut r).unwrap());
    }

    #[test]
    fn test_verify_requires_ascending_nonces() {
        let keys = keys_for("header0");
        let mut proof = [0u32; PROOF_SIZE];
        for (i, p) in proof.iter_mut().enumerate() {
            *p = (PROOF_SIZE - i) as u32; // descending
        }
        assert!(!verify_proof(keys, &proof, SIZE));
    }

    #[test]
    fn test_siphash_is_deterministic() {
        let keys = keys_for("abc");
        assert_eq!(siphash24(keys, 1), siphash24(keys, 1));
        assert_ne!(siphash24(keys, 1), siphash24(keys, 2));
        let other = keys_for("abd");
        assert_ne!(siphash24(keys, 1), siphash24(other, 1));
    }
}
