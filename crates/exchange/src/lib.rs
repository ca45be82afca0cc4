// Copyright 2025 itscheems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Anvil Exchange Routing
//!
//! This crate decides, for every published message, which queues must
//! receive it, and keeps durable exchange/binding topology in the metadata
//! store so it survives restarts.
//!
//! Architecture:
//! - Pure binding matchers for direct, fanout, topic and headers routing
//! - One exclusive lock per exchange guarding its binding set
//! - Per-virtual-host registry owning declare/redeclare semantics
//! - Persist-then-mutate for creates, mutate-then-persist for removals
//! - Recovery rebuilds exchanges and bindings from the store at start-up

pub mod binding;
pub mod codec;
pub mod exchange;
pub mod kind;
pub mod matcher;
pub mod recovery;
pub mod table;
pub mod vhost;

pub use binding::{Binding, BindingError};
pub use codec::DecodeError;
pub use exchange::{Exchange, ExchangeConflict, RoutingContext};
pub use kind::ExchangeKind;
pub use matcher::{HeadersMatch, MatchMode, TopicPattern};
pub use recovery::{RecoveryCoordinator, RecoveryError, RecoveryReport};
pub use table::{FieldTable, FieldValue};
pub use vhost::{DeclareOutcome, ExchangeError, RESERVED_PREFIX, VirtualHost};
