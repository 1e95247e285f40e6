// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![allow(dead_code, reason = "each test binary uses a subset of the rig")]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sublayer_core::trace::Tracer;
use sublayer_core::{
    AmbientContext, ControllerConfig, FrameTiming, HostTime, LayerFailurePolicy,
};
use sublayer_harness::{
    Content, HarnessController, HostScene, MemoryNode, RecordingSink, SnapshotSystem,
};
use tokio::sync::{mpsc, watch};

const FRAME: u64 = 16_666_667;

/// A controller over the reference engine, ticked by hand.
pub struct Rig {
    pub system: SnapshotSystem,
    pub scene: HostScene,
    pub sink: Arc<RecordingSink>,
    pub controller: HarnessController,
    notified: Arc<AtomicUsize>,
    frames_tx: mpsc::Sender<HostTime>,
    frames: watch::Receiver<u64>,
    now: u64,
}

pub fn rig(policy: LayerFailurePolicy) -> Rig {
    rig_with_ambient(policy, AmbientContext::root())
}

pub fn rig_with_ambient(policy: LayerFailurePolicy, ambient: AmbientContext) -> Rig {
    let system = SnapshotSystem::new();
    let scene = HostScene::new();
    let sink = RecordingSink::new();
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let (frames_tx, timing) = FrameTiming::channel(8);
    let mut config = ControllerConfig::default()
        .with_timing(timing)
        .with_failure_policy(policy)
        .with_nodes_changed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    config.ambient = ambient;
    config.tracer = Tracer::new(sink.clone());
    let controller = sublayer_harness::controller(&system, &scene, config);
    let frames = controller.frames();
    Rig {
        system,
        scene,
        sink,
        controller,
        notified,
        frames_tx,
        frames,
        now: 0,
    }
}

impl Rig {
    pub fn start(&self, content: Content) {
        self.controller.start(content).unwrap();
    }

    /// Delivers the next frame and waits until the tick has finished.
    pub async fn tick(&mut self) -> u64 {
        self.now += FRAME;
        let target = *self.frames.borrow() + 1;
        self.frames_tx.send(HostTime(self.now)).await.unwrap();
        self.frames.wait_for(|&n| n >= target).await.unwrap();
        target
    }

    pub fn main_root(&self) -> &MemoryNode {
        self.controller.main_layer().root()
    }

    pub fn notified(&self) -> usize {
        self.notified.load(Ordering::SeqCst)
    }
}
