use std::collections::VecDeque;
use std::time::Duration;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::trace;

use crate::message::msgs::PostMsg;

/// (physical stream id, post id, sequence number)
pub type PostKey = (i32, u32, Option<u32>);

#[derive(Debug, Clone)]
pub struct PendingPost {
    /// the logical request the post was submitted on
    pub request_id: i32,
    pub post: PostMsg,
    pub deadline: Instant,
}

/// Posts waiting for their acknowledgement. All posts share the same timeout, so the expiry list
///  is ordered by deadline simply by appending. Entries of posts that were acknowledged stay in the
///  expiry list until they reach its front and are skipped then.
#[derive(Debug)]
pub struct PostAckTracker {
    timeout: Duration,
    posts: FxHashMap<PostKey, PendingPost>,
    expiry: VecDeque<(Instant, PostKey)>,
}

impl PostAckTracker {
    pub fn new(timeout: Duration) -> PostAckTracker {
        PostAckTracker {
            timeout,
            posts: Default::default(),
            expiry: Default::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn contains(&self, key: &PostKey) -> bool {
        self.posts.contains_key(key)
    }

    pub fn track(&mut self, key: PostKey, request_id: i32, post: PostMsg, now: Instant) {
        let deadline = now + self.timeout;
        trace!("tracking post {:?} until {:?}", key, deadline);
        self.posts.insert(key, PendingPost { request_id, post, deadline });
        self.expiry.push_back((deadline, key));
    }

    pub fn on_ack(&mut self, stream_id: i32, ack_id: u32, seq_num: Option<u32>) -> Option<PendingPost> {
        self.posts.remove(&(stream_id, ack_id, seq_num))
    }

    fn is_live(&self, deadline: &Instant, key: &PostKey) -> bool {
        self.posts.get(key)
            .map(|p| &p.deadline == deadline)
            .unwrap_or(false)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.expiry.iter()
            .find(|(deadline, key)| self.is_live(deadline, key))
            .map(|(deadline, _)| *deadline)
    }

    /// Removes and returns all posts whose deadline is reached, oldest first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<PendingPost> {
        let mut result = Vec::new();
        while let Some((deadline, key)) = self.expiry.front().copied() {
            if deadline > now {
                break;
            }
            self.expiry.pop_front();
            if self.is_live(&deadline, &key) {
                if let Some(post) = self.posts.remove(&key) {
                    result.push(post);
                }
            }
        }
        result
    }

    /// Forgets all posts of a stream without expiring them, returning how many there were.
    pub fn remove_stream(&mut self, stream_id: i32) -> usize {
        let before = self.posts.len();
        self.posts.retain(|(s, _, _), _| *s != stream_id);
        before - self.posts.len()
    }
}
