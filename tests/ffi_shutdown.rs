// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Process teardown through `VB_shutdown`.
//!
//! Kept in its own test binary: shutdown releases every handle in the
//! process-wide registry.

use vecbridge::error::{VB_ERR_UNKNOWN_HANDLE, VB_SUCCESS};
use vecbridge::ffi::*;

#[test]
fn test_shutdown_releases_everything() {
    let flat = VB_create_flat_ip(4);
    let hnsw = VB_create_hnsw_ip(4, 8);
    let ivf = VB_create_ivfpq(4, 2, 2, 8);
    assert!(flat > 0 && hnsw > 0 && ivf > 0);
    assert_eq!(VB_live_count(), 3);

    let freed = VB_free_index(ivf);
    assert_eq!(freed, VB_SUCCESS);
    assert_eq!(VB_live_count(), 2);

    assert_eq!(VB_shutdown(), 2);
    assert_eq!(VB_live_count(), 0);
    for handle in [flat, hnsw, ivf] {
        assert_eq!(VB_free_index(handle), VB_ERR_UNKNOWN_HANDLE);
    }

    // The registry stays usable after shutdown.
    let again = VB_create_flat_ip(2);
    assert!(again > 0);
    assert!(![flat, hnsw, ivf].contains(&again));
    assert_eq!(VB_free_index(again), VB_SUCCESS);
    assert_eq!(VB_shutdown(), 0);
}
