//! Wallet behaviour over chains of real blocks.

use std::sync::Arc;
use tokio_test::assert_ok;

use coin_core::hash::ZERO_HASH;
use coin_core::{Block, KeyPairIdentity, Transaction, TransactionInput, TransactionOutput, UndoBlock};
use wallet::{CoinState, Wallet, WalletConfig, WalletError};

fn wallet(safe_block_amount: u64) -> Wallet {
    let config = WalletConfig {
        safe_block_amount,
        unseen_spend_expiry: 0,
        ..WalletConfig::default()
    };
    Wallet::new(Arc::new(KeyPairIdentity::generate()), config)
}

/// Minimal chain that pays each block's reward to a fixed script
struct Chain {
    blocks: Vec<Block>,
    reward_script: String,
}

impl Chain {
    fn new(reward_script: impl Into<String>) -> Self {
        Self {
            blocks: Vec::new(),
            reward_script: reward_script.into(),
        }
    }

    fn tip(&self) -> [u8; 32] {
        self.blocks.last().map(Block::hash).unwrap_or(ZERO_HASH)
    }

    fn mine(&mut self, reward: u64, transactions: Vec<Transaction>) -> Block {
        let height = self.blocks.len() as u64;
        let mut all = vec![Transaction::coinbase(height, reward, self.reward_script.clone())];
        all.extend(transactions);

        let block = Block::new(self.tip(), all, [0xff; 32]);
        self.blocks.push(block.clone());
        block
    }
}

#[test]
fn test_rewards_confirm_after_safe_depth() {
    let alice = wallet(2);
    let mut chain = Chain::new(alice.locking_script());

    for _ in 0..4 {
        let block = chain.mine(50, Vec::new());
        alice.handle_block(&block);
        alice.check_invariants();
    }

    // Rewards of blocks 0 and 1 are two blocks deep, 2 and 3 are not yet
    assert_eq!(alice.balance(), 100);
    assert_eq!(alice.snapshot().pending_receive.amount, 100);
}

#[test]
fn test_payment_between_wallets() {
    let alice = wallet(1);
    let bob = wallet(1);
    let mut chain = Chain::new(alice.locking_script());

    for _ in 0..3 {
        let block = chain.mine(100, Vec::new());
        alice.handle_block(&block);
        bob.handle_block(&block);
    }
    assert_eq!(alice.balance(), 200);

    let payment = alice.build_spend(120, 5, &bob.locking_script()).unwrap();
    assert_eq!(alice.balance(), 0);
    assert_eq!(alice.unseen_spends(), vec![payment.hash()]);

    let block = chain.mine(100, vec![payment.clone()]);
    alice.handle_block(&block);
    bob.handle_block(&block);

    let states: Vec<CoinState> = alice.coins().iter().map(|view| view.state).collect();
    assert!(states.contains(&CoinState::PendingSpend));
    assert_eq!(bob.snapshot().pending_receive.amount, 120);

    let block = chain.mine(100, Vec::new());
    alice.handle_block(&block);
    bob.handle_block(&block);

    assert_eq!(bob.balance(), 120);
    // Change of 75, plus the rewards of the third and fourth blocks
    assert_eq!(alice.balance(), 75 + 200);
    assert_eq!(alice.snapshot().pending_spend.coins, 0);
    alice.check_invariants();
    bob.check_invariants();
}

#[test]
fn test_insufficient_funds_reports_balance() {
    let alice = wallet(0);
    let mut chain = Chain::new(alice.locking_script());
    alice.handle_block(&chain.mine(30, Vec::new()));

    match alice.build_spend(40, 0, "bob") {
        Err(WalletError::InsufficientFunds { required, available }) => {
            assert_eq!(required, 40);
            assert_eq!(available, 30);
        }
        other => panic!("expected insufficient funds, got {:?}", other),
    }
    assert_eq!(alice.balance(), 30);
}

#[test]
fn test_fork_moves_spend_back_and_replays_new_branch() {
    let alice = wallet(3);
    let mut chain = Chain::new("miner");

    // Fund alice with a payment that is buried deep enough to spend
    let funding_source = wallet(0);
    let mut funding_chain = Chain::new(funding_source.locking_script());
    funding_source.handle_block(&funding_chain.mine(500, Vec::new()));
    let funding = funding_source.build_spend(400, 0, &alice.locking_script()).unwrap();

    alice.handle_block(&chain.mine(50, vec![funding]));
    for _ in 0..3 {
        alice.handle_block(&chain.mine(50, Vec::new()));
    }
    assert_eq!(alice.balance(), 400);

    let spend = alice.build_spend(100, 1, "merchant").unwrap();
    let fork_point = chain.blocks.len();
    let stale = chain.mine(50, vec![spend.clone()]);
    alice.handle_block(&stale);
    assert_eq!(alice.snapshot().pending_spend.coins, 1);
    assert_eq!(alice.snapshot().pending_receive.amount, 299);

    // A competing branch of two blocks replaces the stale one; the spend is
    // re-mined in its second block
    chain.blocks.truncate(fork_point);
    let replacement = vec![chain.mine(50, Vec::new()), chain.mine(50, vec![spend.clone()])];

    alice.handle_fork(&replacement[..1], &[UndoBlock::from_block(&stale)]);
    let snapshot = alice.snapshot();
    assert_eq!(snapshot.pending_spend.coins, 0);
    assert_eq!(snapshot.pending_receive.coins, 0);
    assert_eq!(alice.unseen_spends(), vec![spend.hash()]);
    assert_eq!(alice.balance(), 0);
    alice.check_invariants();

    let observation = alice.handle_block(&replacement[1]).unwrap();
    assert_eq!(observation.spends_seen, 1);
    assert_eq!(observation.coins_received, 1);
    alice.check_invariants();

    // Settled again, so there is nothing left to abandon
    assert!(matches!(
        alice.abandon_spend(&spend.hash()),
        Err(WalletError::UnknownSpend(_))
    ));

    for _ in 0..3 {
        alice.handle_block(&chain.mine(50, Vec::new()));
    }
    let balance = alice.balance();
    assert_eq!(balance, 299);
    assert_ok!(alice.build_spend(299, 0, "merchant"));
}

#[test]
fn test_fork_takes_back_promotion_of_undone_block() {
    let alice = wallet(2);
    let mut chain = Chain::new("miner");

    let payment = Transaction::new(
        1,
        vec![TransactionInput::new([7u8; 32], 0, vec![1])],
        vec![TransactionOutput::new(40, alice.locking_script())],
        0,
    );
    alice.handle_block(&chain.mine(50, vec![payment]));
    alice.handle_block(&chain.mine(50, Vec::new()));
    let promoting = chain.mine(50, Vec::new());
    alice.handle_block(&promoting);
    assert_eq!(alice.balance(), 40);

    // A shallow reorg leaves the payment one confirmation short again
    alice.handle_fork(&[], &[UndoBlock::from_block(&promoting)]);
    assert_eq!(alice.balance(), 0);
    let views = alice.coins();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].state, CoinState::PendingReceive);
    assert_eq!(views[0].confirmations, Some(1));
    alice.check_invariants();

    chain.blocks.pop();
    let replacement = chain.mine(60, Vec::new());
    alice.handle_block(&replacement);
    assert_eq!(alice.balance(), 40);
    alice.check_invariants();
}
