// DANS : src/ton/adnl.rs
//
// Transport ADNL sur TCP vers un liteserver : poignée de main chiffrée
// (ECDH ed25519 → x25519), duplex AES-256-CTR, trames longueur + nonce +
// somme de contrôle, multiplexage des requêtes par identifiant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use aes::Aes256;
use anyhow::{bail, Context, Result};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use curve25519_dalek::montgomery::MontgomeryPoint;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use super::tl::{self, TlReader, TlWriter};

type Aes256Ctr = Ctr128BE<Aes256>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(5);
const MAX_PACKET_LEN: usize = 8 << 20;

struct WriteState {
    half: OwnedWriteHalf,
    cipher: Aes256Ctr,
}

struct Shared {
    peer: String,
    writer: Mutex<WriteState>,
    pending: StdMutex<HashMap<[u8; 32], oneshot::Sender<Vec<u8>>>>,
    closed: AtomicBool,
}

impl Shared {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap();
        pending.clear(); // les expéditeurs abandonnés réveillent les attentes
    }
}

/// Connexion ADNL vers un liteserver. Clonable, partageable entre tâches.
#[derive(Clone)]
pub struct AdnlClient {
    shared: Arc<Shared>,
}

impl AdnlClient {
    /// Établit la connexion et termine la poignée de main.
    pub async fn connect(addr: &str, server_key: &[u8; 32]) -> Result<Self> {
        let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(addr))
            .await
            .with_context(|| format!("connexion TCP vers {} expirée", addr))?
            .with_context(|| format!("connexion TCP vers {} refusée", addr))?;
        stream.set_nodelay(true).ok();

        // Clé éphémère côté client.
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let signing = SigningKey::from_bytes(&seed);
        let our_pub = signing.verifying_key().to_bytes();

        let server_vk = VerifyingKey::from_bytes(server_key)
            .context("clé publique de liteserver invalide")?;
        let shared_secret = ecdh(&seed, &server_vk);

        // 160 octets aléatoires : clés et nonces des deux sens, puis bourrage.
        let mut basis = [0u8; 160];
        rand::thread_rng().fill_bytes(&mut basis);
        let checksum: [u8; 32] = Sha256::digest(basis).into();

        let mut handshake_key = [0u8; 32];
        handshake_key[..16].copy_from_slice(&shared_secret[..16]);
        handshake_key[16..].copy_from_slice(&checksum[16..]);
        let mut handshake_iv = [0u8; 16];
        handshake_iv[..4].copy_from_slice(&checksum[..4]);
        handshake_iv[4..].copy_from_slice(&shared_secret[20..]);

        let mut encrypted = basis;
        Aes256Ctr::new(&handshake_key.into(), &handshake_iv.into())
            .apply_keystream(&mut encrypted);

        let mut packet = Vec::with_capacity(256);
        packet.extend_from_slice(&key_id(server_key));
        packet.extend_from_slice(&our_pub);
        packet.extend_from_slice(&checksum);
        packet.extend_from_slice(&encrypted);

        let mut rx_cipher = cipher_from(&basis[0..32], &basis[64..80]);
        let tx_cipher = cipher_from(&basis[32..64], &basis[80..96]);

        let (mut read_half, mut write_half) = stream.into_split();
        tokio::time::timeout(HANDSHAKE_TIMEOUT, write_half.write_all(&packet))
            .await
            .context("envoi de la poignée de main expiré")??;

        // Le serveur confirme par un paquet vide chiffré.
        tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            read_packet(&mut read_half, &mut rx_cipher),
        )
        .await
        .with_context(|| format!("confirmation ADNL de {} expirée", addr))?
        .with_context(|| format!("poignée de main ADNL avec {} rejetée", addr))?;

        let shared = Arc::new(Shared {
            peer: addr.to_string(),
            writer: Mutex::new(WriteState { half: write_half, cipher: tx_cipher }),
            pending: StdMutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        // Boucle de lecture : distribue les réponses aux requêtes en attente.
        let reader_shared = shared.clone();
        tokio::spawn(async move {
            let mut cipher = rx_cipher;
            loop {
                match read_packet(&mut read_half, &mut cipher).await {
                    Ok(payload) => dispatch(&reader_shared, &payload),
                    Err(e) => {
                        if !reader_shared.closed.load(Ordering::SeqCst) {
                            warn!(peer = %reader_shared.peer, erreur = %e, "connexion liteserver perdue");
                        }
                        reader_shared.close();
                        return;
                    }
                }
            }
        });

        // Keepalive tcp.ping.
        let ping_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PING_INTERVAL).await;
                if ping_shared.closed.load(Ordering::SeqCst) {
                    return;
                }
                let mut w = TlWriter::new();
                w.write_u32(tl::TCP_PING).write_u64(rand::random());
                if send_packet(&ping_shared, &w.finish()).await.is_err() {
                    ping_shared.close();
                    return;
                }
            }
        });

        debug!(peer = addr, "connexion ADNL établie");
        Ok(Self { shared })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Émet une requête liteserver et attend sa réponse.
    pub async fn query(&self, lite_query: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        if self.is_closed() {
            bail!("connexion vers {} fermée", self.shared.peer);
        }

        let mut query_id = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut query_id);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(query_id, tx);

        // liteServer.query enveloppé dans adnl.message.query.
        let mut inner = TlWriter::new();
        inner.write_u32(tl::LITE_QUERY).write_bytes(lite_query);
        let mut w = TlWriter::new();
        w.write_u32(tl::ADNL_MESSAGE_QUERY)
            .write_int256(&query_id)
            .write_bytes(&inner.finish());

        if let Err(e) = send_packet(&self.shared, &w.finish()).await {
            self.shared.pending.lock().unwrap().remove(&query_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => bail!("connexion vers {} perdue", self.shared.peer),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&query_id);
                bail!("requête vers {} expirée", self.shared.peer)
            }
        }
    }
}

// Conversion de la clé ed25519 éphémère et de la clé publique du serveur en
// secret partagé x25519.
fn ecdh(seed: &[u8; 32], server: &VerifyingKey) -> [u8; 32] {
    let digest = Sha512::digest(seed);
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&digest[..32]);
    let point: MontgomeryPoint = server.to_montgomery();
    point.mul_clamped(scalar).to_bytes()
}

// Identifiant ADNL de la clé du serveur : sha256 du constructeur pub.ed25519.
fn key_id(public: &[u8; 32]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(tl::PUB_ED25519.to_le_bytes());
    h.update(public);
    h.finalize().into()
}

fn cipher_from(key: &[u8], iv: &[u8]) -> Aes256Ctr {
    let mut k = [0u8; 32];
    k.copy_from_slice(key);
    let mut n = [0u8; 16];
    n.copy_from_slice(iv);
    Aes256Ctr::new(&k.into(), &n.into())
}

async fn send_packet(shared: &Shared, payload: &[u8]) -> Result<()> {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);

    let len = 32 + payload.len() + 32;
    let mut buf = Vec::with_capacity(4 + len);
    buf.extend_from_slice(&(len as u32).to_le_bytes());
    buf.extend_from_slice(&nonce);
    buf.extend_from_slice(payload);
    let mut checksum = Sha256::new();
    checksum.update(nonce);
    checksum.update(payload);
    buf.extend_from_slice(&checksum.finalize());

    let mut writer = shared.writer.lock().await;
    writer.cipher.apply_keystream(&mut buf);
    writer
        .half
        .write_all(&buf)
        .await
        .with_context(|| format!("écriture vers {} échouée", shared.peer))
}

async fn read_packet(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    cipher: &mut Aes256Ctr,
) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    read_half.read_exact(&mut len_buf).await?;
    cipher.apply_keystream(&mut len_buf);
    let len = u32::from_le_bytes(len_buf) as usize;
    if !(64..=MAX_PACKET_LEN).contains(&len) {
        bail!("longueur de paquet ADNL invalide: {}", len);
    }

    let mut body = vec![0u8; len];
    read_half.read_exact(&mut body).await?;
    cipher.apply_keystream(&mut body);

    let (content, checksum) = body.split_at(len - 32);
    if Sha256::digest(content).as_slice() != checksum {
        bail!("somme de contrôle ADNL invalide");
    }
    Ok(content[32..].to_vec())
}

fn dispatch(shared: &Shared, payload: &[u8]) {
    if payload.len() < 4 {
        return; // paquet de confirmation vide
    }
    let mut r = TlReader::new(payload);
    match r.read_u32() {
        Ok(tl::ADNL_MESSAGE_ANSWER) => {
            let Ok(query_id) = r.read_int256() else { return };
            let Ok(answer) = r.read_bytes() else { return };
            let sender = shared.pending.lock().unwrap().remove(&query_id);
            if let Some(tx) = sender {
                tx.send(answer).ok();
            }
        }
        Ok(tl::TCP_PONG) => {}
        Ok(other) => {
            debug!(peer = %shared.peer, ctor = format!("{:#x}", other), "message ADNL ignoré");
        }
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_depends_on_key() {
        let a = key_id(&[1; 32]);
        let b = key_id(&[2; 32]);
        assert_ne!(a, b);
        // Déterministe.
        assert_eq!(a, key_id(&[1; 32]));
    }

    #[test]
    fn ecdh_is_symmetric_in_shape() {
        // Deux graines distinctes donnent des secrets distincts avec la même
        // clé de serveur.
        let server = SigningKey::from_bytes(&[7; 32]).verifying_key();
        let s1 = ecdh(&[1; 32], &server);
        let s2 = ecdh(&[2; 32], &server);
        assert_ne!(s1, s2);
    }
}
