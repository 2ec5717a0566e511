// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Part of the WEFT project (Work-stealing Execution Fabric for Tiles).

//! Environment-driven execution configuration.
//!
//! Two variables steer device placement:
//!
//! * `GPU_ONLY` (any non-empty value) — all chunks go to the GPU and work
//!   stealing is disabled; the balance monitor drops to a slow cadence.
//! * `DISTRIBUTION` (integer 0–100) — percentage of chunks initially placed
//!   on the GPU. Defaults to 65; an unparsable or out-of-range value is
//!   rejected with a warning and 80 is used instead.

use tracing::warn;

/// Default GPU share of the initial chunk distribution, in percent.
pub const DEFAULT_GPU_SHARE: u8 = 65;

/// GPU share used when `DISTRIBUTION` is present but invalid.
pub const FALLBACK_GPU_SHARE: u8 = 80;

/// Resolved execution options for one runtime invocation.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// All chunks to the GPU; stealing disabled.
    pub gpu_only: bool,
    /// Percentage of chunks initially given to the GPU.
    pub gpu_share: u8,
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig {
            gpu_only: false,
            gpu_share: DEFAULT_GPU_SHARE,
        }
    }
}

impl ExecConfig {
    /// Read `GPU_ONLY` and `DISTRIBUTION` from the process environment.
    pub fn from_env() -> Self {
        let gpu_only = std::env::var("GPU_ONLY")
            .map(|v| !v.is_empty())
            .unwrap_or(false);

        let gpu_share = match std::env::var("DISTRIBUTION") {
            Err(_) => DEFAULT_GPU_SHARE,
            Ok(raw) => Self::parse_distribution(&raw),
        };

        ExecConfig { gpu_only, gpu_share }
    }

    /// Whether chunks may migrate between device queues.
    pub fn stealing_enabled(&self) -> bool {
        !self.gpu_only
    }

    fn parse_distribution(raw: &str) -> u8 {
        match raw.trim().parse::<i64>() {
            Ok(pct) if (0..=100).contains(&pct) => pct as u8,
            Ok(pct) => {
                warn!(value = pct, "DISTRIBUTION outside 0..=100, using {}% GPU", FALLBACK_GPU_SHARE);
                FALLBACK_GPU_SHARE
            }
            Err(_) => {
                warn!(value = raw, "DISTRIBUTION is not an integer, using {}% GPU", FALLBACK_GPU_SHARE);
                FALLBACK_GPU_SHARE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_accepts_in_range() {
        assert_eq!(ExecConfig::parse_distribution("0"), 0);
        assert_eq!(ExecConfig::parse_distribution(" 50 "), 50);
        assert_eq!(ExecConfig::parse_distribution("100"), 100);
    }

    #[test]
    fn distribution_rejects_invalid() {
        assert_eq!(ExecConfig::parse_distribution("101"), FALLBACK_GPU_SHARE);
        assert_eq!(ExecConfig::parse_distribution("-1"), FALLBACK_GPU_SHARE);
        assert_eq!(ExecConfig::parse_distribution("lots"), FALLBACK_GPU_SHARE);
    }
}
