use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::models::{
    command::VoteChoice,
    event::{DeathCause, EventKind},
    game::{Ballot, Game, GamePhase, PendingAbility},
    player::Tag,
    role::Team,
    rule::TiePolicy,
};
use crate::services::role_behavior::{RoleRegistry, VoteOutEffect};
use crate::utils::clock::RandomSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteResult {
    Eliminated { user_id: String },
    IdiotRevealed { user_id: String },
    Runoff { candidates: Vec<String> },
    NoElimination,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoteOutcome {
    pub summary: String,
    pub result: VoteResult,
    pub abilities: Vec<PendingAbility>,
    pub winner: Option<Team>,
}

/// 投票を検証して記録する
pub fn record_vote(
    game: &mut Game,
    voter_id: &str,
    choice: VoteChoice,
) -> Result<(), ValidationError> {
    game.ensure_phase(&[GamePhase::DayVote])?;
    let voter = game.living_actor(voter_id)?;
    if voter.has_tag(Tag::RevealedIdiot) {
        return Err(ValidationError::VotingBarred);
    }
    if game.state.votes.contains_key(voter_id) {
        return Err(ValidationError::AlreadyVoted);
    }

    let ballot = match choice {
        VoteChoice::Abstain => Ballot::Abstain,
        VoteChoice::Target(slot) => {
            let target = game.living_target(slot)?;
            if target.user_id == voter_id {
                return Err(ValidationError::SelfTarget);
            }
            if let Some(candidates) = &game.state.runoff_candidates {
                if !candidates.contains(&target.user_id) {
                    return Err(ValidationError::NotRunoffCandidate);
                }
            }
            Ballot::Target(target.user_id.clone())
        }
    };

    game.state.votes.insert(voter_id.to_string(), ballot);
    Ok(())
}

/// 投票権を持つ全員が投票済みか
pub fn all_votes_in(game: &Game) -> bool {
    game.players
        .iter()
        .filter(|p| p.can_vote())
        .all(|p| game.state.votes.contains_key(&p.user_id))
}

pub fn resolve_votes(
    game: &mut Game,
    registry: &RoleRegistry,
    rng: &dyn RandomSource,
    tie_policy: TiePolicy,
) -> VoteOutcome {
    // 対象の user_id -> 投票者の席番号
    let mut tally: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut abstained = 0;
    for voter in game.players.iter().filter(|p| p.can_vote()) {
        let counted = match game.state.votes.get(&voter.user_id) {
            Some(Ballot::Target(target)) => game
                .player(target)
                .filter(|t| t.is_alive)
                .filter(|t| {
                    game.state
                        .runoff_candidates
                        .as_ref()
                        .map(|c| c.contains(&t.user_id))
                        .unwrap_or(true)
                })
                .map(|t| t.user_id.clone()),
            _ => None,
        };
        match counted {
            Some(target) => tally
                .entry(target)
                .or_default()
                .push(voter.slot.to_string()),
            None => abstained += 1,
        }
    }

    let mut lines = vec!["投票結果:".to_string()];
    let mut rows: Vec<(&String, &Vec<String>)> = tally.iter().collect();
    rows.sort_by(|a, b| {
        b.1.len()
            .cmp(&a.1.len())
            .then_with(|| game.player(a.0).map(|p| p.slot).cmp(&game.player(b.0).map(|p| p.slot)))
    });
    for (target, voters) in &rows {
        lines.push(format!(
            "{}: {}票（{}）",
            game.label(target),
            voters.len(),
            voters.join(", ")
        ));
    }
    lines.push(format!("棄権: {}人", abstained));

    let top = rows.first().map(|(_, v)| v.len()).unwrap_or(0);
    let mut candidates: Vec<String> = rows
        .iter()
        .filter(|(_, v)| top > 0 && v.len() == top)
        .map(|(target, _)| (*target).clone())
        .collect();
    candidates.sort_by_key(|id| game.player(id).map(|p| p.slot));

    let in_runoff = game.state.runoff_candidates.is_some();
    game.state.votes.clear();
    game.state.runoff_candidates = None;

    let mut abilities = Vec::new();
    let result = match candidates.len() {
        0 => {
            lines.push("全員が棄権したため、処刑は行われません。".to_string());
            VoteResult::NoElimination
        }
        1 => eliminate(game, registry, &candidates[0], top, &mut lines, &mut abilities),
        _ => {
            let names: Vec<String> = candidates.iter().map(|id| game.label(id)).collect();
            lines.push(format!("{}が{}票で平票です。", names.join("、"), top));
            match tie_policy {
                TiePolicy::Random => {
                    let chosen = candidates[rng.pick_index(candidates.len())].clone();
                    lines.push(format!("抽選により{}が選ばれました。", game.label(&chosen)));
                    eliminate(game, registry, &chosen, top, &mut lines, &mut abilities)
                }
                TiePolicy::Runoff if !in_runoff => {
                    lines.push("平票の候補者で決選投票を行います。".to_string());
                    VoteResult::Runoff { candidates }
                }
                _ => {
                    lines.push("平票のため、処刑は行われません。".to_string());
                    VoteResult::NoElimination
                }
            }
        }
    };

    VoteOutcome {
        summary: lines.join("\n"),
        result,
        abilities,
        winner: game.winner(),
    }
}

fn eliminate(
    game: &mut Game,
    registry: &RoleRegistry,
    user_id: &str,
    votes: usize,
    lines: &mut Vec<String>,
    abilities: &mut Vec<PendingAbility>,
) -> VoteResult {
    let Some(player) = game.player(user_id) else {
        return VoteResult::NoElimination;
    };
    let label = player.info();
    let behavior = player.role.map(|role| registry.behavior(role));
    let effect = behavior
        .map(|b| b.on_vote_out(player))
        .unwrap_or(VoteOutEffect::Dies);

    match effect {
        VoteOutEffect::Reveal => {
            if let Some(player) = game.player_mut(user_id) {
                player.add_tag(Tag::RevealedIdiot);
            }
            game.record_event(EventKind::IdiotReveal, None, Some(user_id));
            lines.push(format!(
                "{}が処刑されかけましたが、愚者であることが明かされました。以後投票できません。",
                label
            ));
            VoteResult::IdiotRevealed {
                user_id: user_id.to_string(),
            }
        }
        VoteOutEffect::Dies => {
            game.kill(user_id);
            game.record_event(EventKind::VoteOut { votes }, None, Some(user_id));
            lines.push(format!("{}が処刑されました。", label));
            if let Some(ability) = behavior.and_then(|b| b.on_death(user_id, DeathCause::Vote)) {
                abilities.push(ability);
            }
            VoteResult::Eliminated {
                user_id: user_id.to_string(),
            }
        }
    }
}
