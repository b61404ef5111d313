// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Claim mapping (C10) and the actor-supplied request-context filter (C11).

mod filter;
mod mapper;

pub use filter::{parse_proposed_request_context, ClaimsFilter};
pub use mapper::{ClaimExpression, ClaimMapper, DataSourceMemo, ExpressionClaimMapper, MapperInput};
