//! Wallet state for the ledger worker
//!
//! The wallet key is derived from the recovery phrase, so restoring a phrase
//! restores the identity that signs zap tokens. Minting goes through a
//! [`MintBackend`], which decides whether the invoice for an amount is paid.

use std::collections::HashSet;

use ciborium::Value;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ReelError;
use crate::hash::{blake2b_256, derive_wallet_seed};
use crate::signing::{verify_raw, SigningKeyPair};
use crate::types::now_ms;

/// Number of words in a generated recovery phrase
pub const PHRASE_WORDS: usize = 12;

/// Zap token format version
pub const ZAP_TOKEN_VERSION: u8 = 1;

/// Unpaid invoices kept for retry; the oldest is dropped beyond this
pub const MAX_UNPAID_INVOICES: usize = 16;

const WORDLIST: [&str; 128] = [
    "acid", "aunt", "bark", "beam", "bike", "bird", "blue", "bolt", "bone", "brick", "cabin",
    "cake", "calm", "camp", "card", "cave", "chalk", "chef", "city", "clay", "cliff", "cloud",
    "coin", "comet", "coral", "crane", "crow", "dawn", "deer", "desk", "dove", "drum", "dune",
    "eagle", "echo", "elm", "ember", "fable", "fern", "field", "flame", "flute", "foam", "fog",
    "fox", "frost", "gale", "gem", "glass", "globe", "goat", "grain", "grove", "harbor", "hawk",
    "hazel", "hill", "honey", "horn", "ice", "ink", "iris", "ivy", "jade", "jazz", "kelp",
    "kite", "lake", "lamp", "lark", "leaf", "lemon", "lily", "lion", "loom", "lunar", "maple",
    "marsh", "meadow", "mint", "moss", "moth", "nest", "noon", "oak", "ocean", "olive", "onyx",
    "orbit", "otter", "owl", "palm", "pearl", "pine", "plum", "pond", "quartz", "quill",
    "rain", "raven", "reed", "reef", "ridge", "river", "robin", "rose", "sage", "sand", "seal",
    "shell", "silk", "slate", "snow", "spark", "spruce", "star", "stone", "storm", "swan",
    "thorn", "tide", "tiger", "vale", "wave", "willow", "wind", "wolf", "wren",
];

/// A request for payment covering a mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub id: String,
    pub amount: u64,
}

/// Issues and settles mint invoices
pub trait MintBackend: Send {
    /// Create an invoice for `amount` sats
    fn request_invoice(&mut self, amount: u64) -> Result<Invoice, ReelError>;

    /// Whether the invoice has been paid
    fn is_paid(&self, invoice: &Invoice) -> bool;
}

/// In-process mint used for local development
#[derive(Debug, Default)]
pub struct LocalMint {
    auto_pay: bool,
    paid: HashSet<String>,
}

impl LocalMint {
    pub fn new(auto_pay: bool) -> Self {
        Self {
            auto_pay,
            paid: HashSet::new(),
        }
    }

    /// Mark an invoice as paid
    pub fn pay(&mut self, invoice_id: &str) {
        self.paid.insert(invoice_id.to_string());
    }
}

impl MintBackend for LocalMint {
    fn request_invoice(&mut self, amount: u64) -> Result<Invoice, ReelError> {
        let invoice = Invoice {
            id: uuid::Uuid::new_v4().to_string(),
            amount,
        };
        if self.auto_pay {
            self.paid.insert(invoice.id.clone());
        }
        Ok(invoice)
    }

    fn is_paid(&self, invoice: &Invoice) -> bool {
        self.paid.contains(&invoice.id)
    }
}

/// Result of `sendZap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZapToken {
    /// Hex-encoded signed token payload
    pub token: String,
    pub sats: u64,
    pub receiver: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Claims carried inside a zap token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZapClaims {
    pub v: u8,
    /// Hex-encoded public key of the sending wallet
    pub sender: String,
    pub receiver: String,
    pub sats: u64,
    pub reference: String,
    pub ts: u64,
    pub nonce: String,
}

struct WalletState {
    phrase: String,
    keypair: SigningKeyPair,
    balance: u64,
}

/// Wallet owned by the ledger worker
pub struct Wallet<M: MintBackend = LocalMint> {
    state: Option<WalletState>,
    backend: M,
    unpaid: Vec<Invoice>,
}

impl<M: MintBackend> Wallet<M> {
    pub fn new(backend: M) -> Self {
        Self {
            state: None,
            backend,
            unpaid: Vec::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn backend_mut(&mut self) -> &mut M {
        &mut self.backend
    }

    /// Install a recovery phrase, or generate one when none is given
    ///
    /// Calling without a phrase on an initialized wallet returns the current
    /// phrase. Restoring the phrase already in use keeps the balance.
    pub fn init(&mut self, phrase: Option<&str>) -> Result<String, ReelError> {
        let phrase = match phrase {
            Some(p) => {
                let normalized = normalize_phrase(p);
                if normalized.is_empty() {
                    return Err(ReelError::InvalidArgs("recovery phrase must not be empty".to_string()));
                }
                normalized
            }
            None => match &self.state {
                Some(state) => return Ok(state.phrase.clone()),
                None => generate_phrase(),
            },
        };

        if let Some(state) = &self.state {
            if state.phrase == phrase {
                return Ok(phrase);
            }
        }

        let keypair = SigningKeyPair::from_seed(&derive_wallet_seed(&phrase));
        info!(pubkey = %keypair.public_key_hex(), "wallet initialized");
        self.state = Some(WalletState {
            phrase: phrase.clone(),
            keypair,
            balance: 0,
        });
        self.unpaid.clear();
        Ok(phrase)
    }

    fn state(&self) -> Result<&WalletState, ReelError> {
        self.state
            .as_ref()
            .ok_or_else(|| ReelError::Uninitialized("wallet has not been initialized".to_string()))
    }

    fn state_mut(&mut self) -> Result<&mut WalletState, ReelError> {
        self.state
            .as_mut()
            .ok_or_else(|| ReelError::Uninitialized("wallet has not been initialized".to_string()))
    }

    pub fn balance(&self) -> Result<u64, ReelError> {
        Ok(self.state()?.balance)
    }

    pub fn public_key_hex(&self) -> Result<String, ReelError> {
        Ok(self.state()?.keypair.public_key_hex())
    }

    /// Number of unpaid invoices awaiting a retried mint
    pub fn pending_invoices(&self) -> usize {
        self.unpaid.len()
    }

    /// Mint `amount` sats once the backing invoice is paid
    ///
    /// An unpaid invoice is kept and settled by the next mint of the same
    /// amount. At most [`MAX_UNPAID_INVOICES`] are kept, dropping the oldest.
    pub fn mint(&mut self, amount: u64) -> Result<u64, ReelError> {
        self.state()?;
        if amount == 0 {
            return Err(ReelError::InvalidArgs("mint amount must be positive".to_string()));
        }

        let invoice = match self.unpaid.iter().position(|i| i.amount == amount) {
            Some(pos) => self.unpaid.remove(pos),
            None => self.backend.request_invoice(amount)?,
        };

        if !self.backend.is_paid(&invoice) {
            let id = invoice.id.clone();
            debug!(invoice = %id, amount, "mint invoice unpaid");
            self.unpaid.push(invoice);
            if self.unpaid.len() > MAX_UNPAID_INVOICES {
                let dropped = self.unpaid.remove(0);
                debug!(invoice = %dropped.id, amount = dropped.amount, "unpaid invoice dropped");
            }
            return Err(ReelError::InvoiceUnpaid(id));
        }

        let state = self.state_mut()?;
        state.balance = state
            .balance
            .checked_add(amount)
            .ok_or_else(|| ReelError::InvalidArgs("balance overflow".to_string()))?;
        debug!(amount, balance = state.balance, "minted");
        Ok(amount)
    }

    /// Debit `amount` sats and return a signed token for the receiver
    pub fn send_zap(&mut self, receiver: &str, amount: u64, reference: &str) -> Result<ZapToken, ReelError> {
        let state = self.state_mut()?;
        if receiver.is_empty() {
            return Err(ReelError::InvalidArgs("receiver must not be empty".to_string()));
        }
        if amount == 0 {
            return Err(ReelError::InvalidArgs("zap amount must be positive".to_string()));
        }
        if state.balance < amount {
            return Err(ReelError::InsufficientFunds {
                needed: amount,
                available: state.balance,
            });
        }

        let claims = ZapClaims {
            v: ZAP_TOKEN_VERSION,
            sender: state.keypair.public_key_hex(),
            receiver: receiver.to_string(),
            sats: amount,
            reference: reference.to_string(),
            ts: now_ms(),
            nonce: uuid::Uuid::new_v4().to_string(),
        };

        let mut payload = Vec::new();
        ciborium::into_writer(&claims, &mut payload).map_err(|e| ReelError::Cbor(e.to_string()))?;
        let signature = state.keypair.sign(&blake2b_256(&payload));

        let envelope = Value::Array(vec![Value::Bytes(payload), Value::Bytes(signature.to_vec())]);
        let mut token = Vec::new();
        ciborium::into_writer(&envelope, &mut token).map_err(|e| ReelError::Cbor(e.to_string()))?;

        state.balance -= amount;
        debug!(receiver, amount, balance = state.balance, "zap sent");

        Ok(ZapToken {
            token: hex::encode(token),
            sats: amount,
            receiver: receiver.to_string(),
            reference: reference.to_string(),
        })
    }
}

/// Decode a zap token and verify its signature against the embedded sender key
pub fn verify_zap_token(token_hex: &str) -> Result<ZapClaims, ReelError> {
    let bytes = hex::decode(token_hex).map_err(|e| ReelError::InvalidArgs(e.to_string()))?;
    let envelope: Value =
        ciborium::from_reader(bytes.as_slice()).map_err(|e| ReelError::Cbor(e.to_string()))?;

    let (payload, signature) = match envelope {
        Value::Array(items) => match <[Value; 2]>::try_from(items) {
            Ok([Value::Bytes(payload), Value::Bytes(signature)]) => (payload, signature),
            _ => return Err(ReelError::InvalidArgs("malformed zap token".to_string())),
        },
        _ => return Err(ReelError::InvalidArgs("malformed zap token".to_string())),
    };

    let claims: ZapClaims =
        ciborium::from_reader(payload.as_slice()).map_err(|e| ReelError::Cbor(e.to_string()))?;
    verify_raw(&blake2b_256(&payload), &signature, &claims.sender)?;
    Ok(claims)
}

/// Generate a random recovery phrase
pub fn generate_phrase() -> String {
    let mut rng = rand::thread_rng();
    (0..PHRASE_WORDS)
        .filter_map(|_| WORDLIST.choose(&mut rng).copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> Wallet {
        Wallet::new(LocalMint::new(true))
    }

    #[test]
    fn test_generated_phrase_has_twelve_words() {
        let phrase = generate_phrase();
        assert_eq!(phrase.split(' ').count(), PHRASE_WORDS);
        assert!(phrase.split(' ').all(|w| WORDLIST.contains(&w)));
    }

    #[test]
    fn test_init_generates_phrase() {
        let mut wallet = wallet();
        assert!(!wallet.is_initialized());
        let phrase = wallet.init(None).unwrap();
        assert!(wallet.is_initialized());
        assert_eq!(wallet.init(None).unwrap(), phrase);
    }

    #[test]
    fn test_init_restores_same_key() {
        let mut a = wallet();
        let mut b = wallet();
        a.init(Some("Oak  river stone")).unwrap();
        let phrase = b.init(Some("oak river stone")).unwrap();

        assert_eq!(phrase, "oak river stone");
        assert_eq!(a.public_key_hex().unwrap(), b.public_key_hex().unwrap());
    }

    #[test]
    fn test_init_rejects_blank_phrase() {
        assert!(matches!(wallet().init(Some("   ")), Err(ReelError::InvalidArgs(_))));
    }

    #[test]
    fn test_mint_requires_init() {
        let mut wallet = wallet();
        assert!(matches!(wallet.mint(5), Err(ReelError::Uninitialized(_))));
    }

    #[test]
    fn test_mint_credits_balance() {
        let mut wallet = wallet();
        wallet.init(None).unwrap();
        assert_eq!(wallet.mint(5).unwrap(), 5);
        assert_eq!(wallet.mint(7).unwrap(), 7);
        assert_eq!(wallet.balance().unwrap(), 12);
        assert!(matches!(wallet.mint(0), Err(ReelError::InvalidArgs(_))));
    }

    #[test]
    fn test_mint_unpaid_invoice_then_paid() {
        let mut wallet = Wallet::new(LocalMint::new(false));
        wallet.init(None).unwrap();

        let invoice_id = match wallet.mint(5) {
            Err(ReelError::InvoiceUnpaid(id)) => id,
            other => panic!("expected unpaid invoice, got {:?}", other),
        };
        assert_eq!(wallet.balance().unwrap(), 0);

        wallet.backend_mut().pay(&invoice_id);
        assert_eq!(wallet.mint(5).unwrap(), 5);
        assert_eq!(wallet.balance().unwrap(), 5);
    }

    #[test]
    fn test_unpaid_invoices_are_bounded() {
        let mut wallet = Wallet::new(LocalMint::new(false));
        wallet.init(None).unwrap();

        // Retrying one amount reuses its invoice
        for _ in 0..5 {
            assert!(wallet.mint(3).is_err());
        }
        assert_eq!(wallet.pending_invoices(), 1);

        let mut last = String::new();
        for amount in 1..=(MAX_UNPAID_INVOICES as u64 * 3) {
            if let Err(ReelError::InvoiceUnpaid(id)) = wallet.mint(amount) {
                last = id;
            }
        }
        assert_eq!(wallet.pending_invoices(), MAX_UNPAID_INVOICES);

        // The newest invoice is still settleable
        wallet.backend_mut().pay(&last);
        let newest = MAX_UNPAID_INVOICES as u64 * 3;
        assert_eq!(wallet.mint(newest).unwrap(), newest);
        assert_eq!(wallet.pending_invoices(), MAX_UNPAID_INVOICES - 1);
    }

    #[test]
    fn test_send_zap_requires_init() {
        let mut wallet = wallet();
        assert!(matches!(
            wallet.send_zap("pk", 5, "ref1"),
            Err(ReelError::Uninitialized(_))
        ));
    }

    #[test]
    fn test_send_zap_debits_and_signs() {
        let mut wallet = wallet();
        wallet.init(None).unwrap();
        wallet.mint(5).unwrap();

        let zap = wallet.send_zap("pk", 5, "ref1").unwrap();
        assert!(!zap.token.is_empty());
        assert_eq!(zap.sats, 5);
        assert_eq!(zap.reference, "ref1");
        assert_eq!(wallet.balance().unwrap(), 0);

        let claims = verify_zap_token(&zap.token).unwrap();
        assert_eq!(claims.receiver, "pk");
        assert_eq!(claims.sats, 5);
        assert_eq!(claims.sender, wallet.public_key_hex().unwrap());
    }

    #[test]
    fn test_send_zap_insufficient_funds() {
        let mut wallet = wallet();
        wallet.init(None).unwrap();
        wallet.mint(3).unwrap();

        let result = wallet.send_zap("pk", 5, "ref1");
        assert!(matches!(
            result,
            Err(ReelError::InsufficientFunds { needed: 5, available: 3 })
        ));
        assert_eq!(wallet.balance().unwrap(), 3);
    }

    #[test]
    fn test_tampered_token_fails_verification() {
        let mut wallet = wallet();
        wallet.init(None).unwrap();
        wallet.mint(5).unwrap();
        let zap = wallet.send_zap("pk", 5, "ref1").unwrap();

        let mut bytes = hex::decode(&zap.token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(verify_zap_token(&hex::encode(bytes)).is_err());
    }

    #[test]
    fn test_zap_token_serializes_ref_field() {
        let zap = ZapToken {
            token: "ab".to_string(),
            sats: 5,
            receiver: "pk".to_string(),
            reference: "ref1".to_string(),
        };
        let json = serde_json::to_value(&zap).unwrap();
        assert_eq!(json["ref"], "ref1");
    }
}
