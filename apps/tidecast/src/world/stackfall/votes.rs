use std::collections::HashMap;

use crate::message::SessionId;

use super::PieceCmd;

/// Input merging for co-op play: players vote on the next command for the
/// shared piece, and a command applies once its backing reaches half of the
/// votes cast this round, inclusive. Re-casting replaces the player's
/// earlier vote; a merge clears the round. The inclusive threshold means a
/// round with a single vote resolves immediately — quick consensus rather
/// than strict agreement.
#[derive(Default)]
pub struct Votes {
    cast: HashMap<SessionId, PieceCmd>,
    order: Vec<SessionId>,
}

impl Votes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote. Returns the winning command when `cmd` is backed by
    /// at least half of the votes cast this round.
    pub fn cast(&mut self, player: SessionId, cmd: PieceCmd) -> Option<PieceCmd> {
        if !self.cast.contains_key(&player) {
            self.order.push(player.clone());
        }
        self.cast.insert(player, cmd);

        let needed = self.cast.len() / 2;
        let backing = self.cast.values().filter(|&&c| c == cmd).count();
        if backing >= needed {
            self.clear();
            return Some(cmd);
        }
        None
    }

    pub fn remove(&mut self, player: &SessionId) {
        self.cast.remove(player);
        self.order.retain(|p| p != player);
    }

    pub fn clear(&mut self) {
        self.cast.clear();
        self.order.clear();
    }

    /// Pending votes in cast order, for display beside the board.
    pub fn pending(&self) -> impl Iterator<Item = PieceCmd> + '_ {
        self.order.iter().filter_map(|p| self.cast.get(p).copied())
    }
}
