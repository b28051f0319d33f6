//! Attribution of RTP streams to the users speaking over them.
use dashmap::DashMap;
use earshot_voice_model::id::UserId;
use tracing::debug;

/// Concurrent map from RTP SSRC to the speaking user.
///
/// Written by the voice gateway task on every speaking or client-connect event, and read by
/// the UDP receive task for every packet. Entries live until overwritten or the session ends.
#[derive(Debug, Default)]
pub struct SsrcTable {
    map: DashMap<u32, UserId>,
}

impl SsrcTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `ssrc` to `user`, returning the user it was previously attributed to.
    pub fn insert(&self, ssrc: u32, user: UserId) -> Option<UserId> {
        let old = self.map.insert(ssrc, user);

        if old != Some(user) {
            debug!("SSRC {} mapped to user {}.", ssrc, user);
        }

        old
    }

    #[must_use]
    pub fn get(&self, ssrc: u32) -> Option<UserId> {
        self.map.get(&ssrc).map(|entry| *entry)
    }

    /// Removes every stream belonging to `user`, returning their SSRCs.
    pub fn remove_user(&self, user: UserId) -> Vec<u32> {
        let ssrcs: Vec<u32> = self
            .map
            .iter()
            .filter(|entry| *entry.value() == user)
            .map(|entry| *entry.key())
            .collect();

        for ssrc in &ssrcs {
            self.map.remove_if(ssrc, |_, mapped| *mapped == user);
        }

        ssrcs
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
