//! Ledger worker - wallet, minting and zaps

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use libreel_core::config::LedgerConfig;
use libreel_core::{LocalMint, ReelError, Wallet, ZapToken};
use libreel_ipc::{HandlerTable, Method, Value};
use tracing::info;

use super::{domain_error, required_text, sync_handler, text_arg, to_value, unsigned_arg};

pub struct LedgerWorker {
    wallet: Mutex<Wallet<LocalMint>>,
}

impl LedgerWorker {
    pub fn new(config: &LedgerConfig) -> Self {
        Self::with_wallet(Wallet::new(LocalMint::new(config.auto_pay_invoices)))
    }

    pub fn with_wallet(wallet: Wallet<LocalMint>) -> Self {
        Self {
            wallet: Mutex::new(wallet),
        }
    }

    fn wallet(&self) -> MutexGuard<'_, Wallet<LocalMint>> {
        self.wallet.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn init_wallet(&self, phrase: Option<&str>) -> Result<String, ReelError> {
        self.wallet().init(phrase)
    }

    pub fn mint(&self, amount: u64) -> Result<u64, ReelError> {
        let mut wallet = self.wallet();
        let minted = wallet.mint(amount)?;
        info!(amount = minted, balance = wallet.balance()?, "mint settled");
        Ok(minted)
    }

    pub fn send_zap(&self, receiver: &str, amount: u64, reference: &str) -> Result<ZapToken, ReelError> {
        let mut wallet = self.wallet();
        let zap = wallet.send_zap(receiver, amount, reference)?;
        info!(receiver, sats = zap.sats, reference, balance = wallet.balance()?, "zap sent");
        Ok(zap)
    }

    pub fn balance(&self) -> Result<u64, ReelError> {
        self.wallet().balance()
    }

    /// Mark a pending invoice as paid on the local mint
    pub fn pay_invoice(&self, invoice_id: &str) {
        self.wallet().backend_mut().pay(invoice_id);
    }

    pub fn handlers(self: Arc<Self>) -> HandlerTable {
        HandlerTable::new()
            .with(
                Method::InitWallet,
                sync_handler(&self, |w, args| {
                    let phrase = text_arg(&args, 0);
                    to_value(&w.init_wallet(phrase.as_deref()).map_err(domain_error)?)
                }),
            )
            .with(
                Method::Mint,
                sync_handler(&self, |w, args| {
                    let amount = unsigned_arg(&args, 0)
                        .ok_or_else(|| domain_error(ReelError::InvalidArgs("amount is required".into())))?;
                    to_value(&w.mint(amount).map_err(domain_error)?)
                }),
            )
            .with(
                Method::SendZap,
                sync_handler(&self, |w, args| {
                    let receiver = required_text(&args, 0, "receiver")?;
                    let amount = unsigned_arg(&args, 1)
                        .ok_or_else(|| domain_error(ReelError::InvalidArgs("amount is required".into())))?;
                    let reference = required_text(&args, 2, "reference")?;
                    to_value(&w.send_zap(&receiver, amount, &reference).map_err(domain_error)?)
                }),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libreel_core::wallet::verify_zap_token;

    #[test]
    fn test_mint_requires_wallet() {
        let worker = LedgerWorker::new(&LedgerConfig::default());
        assert!(matches!(worker.mint(5), Err(ReelError::Uninitialized(_))));
    }

    #[test]
    fn test_unpaid_invoice_then_paid() {
        let worker = LedgerWorker::new(&LedgerConfig {
            auto_pay_invoices: false,
        });
        worker.init_wallet(None).unwrap();

        let invoice_id = match worker.mint(5) {
            Err(ReelError::InvoiceUnpaid(id)) => id,
            other => panic!("expected unpaid invoice, got {:?}", other),
        };
        worker.pay_invoice(&invoice_id);
        assert_eq!(worker.mint(5).unwrap(), 5);
        assert_eq!(worker.balance().unwrap(), 5);
    }

    #[test]
    fn test_zap_debits_and_verifies() {
        let worker = LedgerWorker::new(&LedgerConfig::default());
        worker.init_wallet(None).unwrap();
        worker.mint(10).unwrap();

        let zap = worker.send_zap("pk", 4, "ref1").unwrap();
        assert_eq!(worker.balance().unwrap(), 6);

        let claims = verify_zap_token(&zap.token).unwrap();
        assert_eq!(claims.sats, 4);
        assert_eq!(claims.receiver, "pk");

        assert!(matches!(
            worker.send_zap("pk", 100, "ref2"),
            Err(ReelError::InsufficientFunds { needed: 100, available: 6 })
        ));
    }
}
