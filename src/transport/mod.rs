// Copyright 2026 The wiremux Authors
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

//! Session level of the transport: logical conns multiplexed over one link
//! per remote endpoint, plus the listener/dialer pair that establishes and
//! deduplicates links.

pub use conn::Conn;
pub use dialer::Dialer;
pub use id::{Addr, ConnId, LinkId};
pub use link::Link;
pub use listener::Listener;

mod conn;
mod dialer;
mod id;
mod link;
mod listener;
