// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rotating signing-key machinery: the slot store (C3), the key provider
//! (C4), the rotation manager (C5), and JWK/thumbprint conversion.

mod jwk;
mod manager;
mod provider;
mod slot;

pub use jwk::{jwk_thumbprint, rsa_public_key_to_jwk, rsa_public_key_to_jwk_with_algorithm, PublicKey};
pub use manager::{RotatingKeyManager, RotationParams};
pub use provider::{KeyProvider, RsaKeyProvider, Signer};
pub use slot::{InMemoryKeySlotStore, KeySlot, KeySlotStore, SlotPosition, SlotState};
