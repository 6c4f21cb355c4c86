// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use std::future::Future;

use tokio::task::JoinSet;

/// Run every job concurrently and wait for all of them to finish.
///
/// A panicking job is logged and does not take the others down.
pub async fn wait_for_all<I, F>(jobs: I)
where
    I: IntoIterator<Item = F>,
    F: Future<Output = ()> + Send + 'static,
{
    let mut set = JoinSet::new();
    for job in jobs {
        set.spawn(job);
    }
    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            if e.is_panic() {
                error!("task panicked: {}", e);
            }
        }
    }
}

/// Run every job concurrently and wait for the first to finish.
///
/// With `cancel_rest` the remaining jobs are aborted and awaited
/// before returning; otherwise they run on unattended.
pub async fn wait_for_any<I, F>(jobs: I, cancel_rest: bool)
where
    I: IntoIterator<Item = F>,
    F: Future<Output = ()> + Send + 'static,
{
    let mut set = JoinSet::new();
    for job in jobs {
        set.spawn(job);
    }

    if let Some(result) = set.join_next().await {
        if let Err(e) = result {
            if e.is_panic() {
                error!("task panicked: {}", e);
            }
        }
    }

    if cancel_rest {
        set.abort_all();
        while set.join_next().await.is_some() {}
    } else {
        // Dropping a join set aborts its tasks; hand it off so the
        // rest can finish on their own.
        tokio::spawn(async move { while set.join_next().await.is_some() {} });
    }
}
