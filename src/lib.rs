// src/lib.rs

// On déclare les modules principaux pour les rendre utilisables par le
// binaire (bin/indexer.rs) et par les tests d'intégration.
pub mod cache;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod indexer;
pub mod monitoring;
pub mod notifier;
pub mod registry;
pub mod ton;
pub mod verifier;
