// Copyright 2026 Daniel Pelikan
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

//! Thermal printer byte sequence.
//!
//! The printer speaks a small subset of the ESC/POS command set. Only the
//! paper-advance spacing and the full-cut command are used.

use uuid::Uuid;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Line feed.
pub const LF: u8 = 0x0A;

/// Spacing fed between the text and the cut so the receipt clears the blade.
pub const FEED_BEFORE_CUT: [u8; 5] = [LF; 5];

/// GS V 0: full paper cut.
pub const CUT_FULL: [u8; 3] = [0x1D, 0x56, 0x00];

/// Text payload as written to the printer: UTF-8 bytes followed by a newline.
pub fn text_line(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(LF);
    bytes
}

/// The complete byte stream for one print job, in write order.
pub fn job_bytes(text: &str) -> Vec<u8> {
    let mut bytes = text_line(text);
    bytes.extend_from_slice(&FEED_BEFORE_CUT);
    bytes.extend_from_slice(&CUT_FULL);
    bytes
}
