use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tracing::debug;

use crate::queue::WorkQueue;
use crate::types::PodIdentity;

/// Current pod state on demand.
#[async_trait]
pub trait PodSource: Send + Sync {
    /// `Ok(None)` when the pod no longer exists.
    async fn get_pod(&self, key: &PodIdentity) -> Result<Option<Pod>, kube::Error>;
}

pub struct KubePodSource {
    client: Client,
}

impl KubePodSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodSource for KubePodSource {
    async fn get_pod(&self, key: &PodIdentity) -> Result<Option<Pod>, kube::Error> {
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
        pod_api.get_opt(&key.name).await
    }
}

pub type PodEventStream = BoxStream<'static, Result<watcher::Event<Pod>, watcher::Error>>;

/// Watch stream over every namespace, or one watcher per listed namespace.
/// Watch errors are retried with the watcher's default backoff.
pub fn pod_events(client: Client, namespaces: &[String]) -> PodEventStream {
    if namespaces.is_empty() {
        let pod_api: Api<Pod> = Api::all(client);
        return watcher(pod_api, watcher::Config::default())
            .default_backoff()
            .boxed();
    }

    let streams = namespaces.iter().map(|ns| {
        let pod_api: Api<Pod> = Api::namespaced(client.clone(), ns);
        watcher(pod_api, watcher::Config::default())
            .default_backoff()
            .boxed()
    });
    stream::select_all(streams).boxed()
}

pub fn pod_identity(pod: &Pod) -> Option<PodIdentity> {
    let name = pod.metadata.name.as_ref()?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
    Some(PodIdentity::new(namespace, name.as_str()))
}

/// Enqueues every pod touched by `event`; returns how many keys were offered.
/// A re-list enqueues all current pods, which the queue deduplicates.
pub fn enqueue_event(queue: &WorkQueue<PodIdentity>, event: watcher::Event<Pod>) -> usize {
    let pods = match event {
        watcher::Event::Applied(pod) | watcher::Event::Deleted(pod) => vec![pod],
        watcher::Event::Restarted(pods) => {
            debug!("pod watch resynced with {} pods", pods.len());
            pods
        }
    };

    let mut offered = 0;
    for key in pods.iter().filter_map(pod_identity) {
        queue.enqueue(key);
        offered += 1;
    }
    offered
}
