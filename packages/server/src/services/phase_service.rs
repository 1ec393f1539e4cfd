//! フェーズの状態遷移。各関数はゲームを直接書き換え、送信すべき通知を `Effects` に積む。
//! 永続化と通知の配信は呼び出し側（game_service）が行う。

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::{GameError, ValidationError};
use crate::models::{
    command::AbilityKind,
    config::GameConfig,
    event::{DeathCause, EventKind},
    game::{Game, GamePhase, PendingAbility, Potion, Resume},
    player::Slot,
    role::Role,
    rule::resolve_setup,
};
use crate::services::night_resolver::{resolve_night, tally_wolf_target};
use crate::services::notifier::Notice;
use crate::services::recap::{final_roles, generate_recap};
use crate::services::role_behavior::RoleRegistry;
use crate::services::vote_resolver::{resolve_votes, VoteResult};
use crate::utils::clock::RandomSource;

pub struct PhaseContext<'a> {
    pub config: &'a GameConfig,
    pub registry: &'a RoleRegistry,
    pub rng: &'a dyn RandomSource,
    pub now: DateTime<Utc>,
}

impl PhaseContext<'_> {
    fn deadline_after(&self, duration: std::time::Duration) -> DateTime<Utc> {
        self.now + Duration::from_std(duration).unwrap_or_else(|_| Duration::seconds(30))
    }
}

/// 保存が成功した後に配信する通知
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub notices: Vec<Notice>,
    /// ゲームが終了し、セッションを片付ける必要がある
    pub ended: bool,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcast(&mut self, text: impl Into<String>) {
        self.notices.push(Notice::Broadcast(text.into()));
    }

    pub fn direct(&mut self, user_id: &str, text: impl Into<String>) {
        self.notices.push(Notice::Direct {
            user_id: user_id.to_string(),
            text: text.into(),
        });
    }
}

fn set_phase(game: &mut Game, phase: GamePhase, deadline: Option<DateTime<Utc>>) {
    debug!(
        "Session {} phase {:?} -> {:?} (day {})",
        game.session_id, game.state.phase, phase, game.state.day
    );
    game.state.phase = phase;
    game.state.deadline = deadline;
}

fn night_prompt(role: Role) -> Option<&'static str> {
    match role {
        Role::Werewolf | Role::WolfKing | Role::WhiteWolfKing => {
            Some("襲撃する相手の席番号を送信してください。仲間との相談もできます。")
        }
        Role::Seer => Some("占う相手の席番号を送信してください。"),
        Role::Guard => Some("護衛する相手の席番号を送信してください。"),
        _ => None,
    }
}

/// 配役を決めて最初の夜に入る。失敗した場合は呼び出し側で書き込みを破棄する
pub fn begin_game(game: &mut Game, ctx: &PhaseContext<'_>) -> Result<Effects, GameError> {
    game.ensure_phase(&[GamePhase::Waiting])?;
    set_phase(game, GamePhase::Starting, None);

    let setup = resolve_setup(&game.state.preset, game.players.len())?;
    game.assign_roles(&setup.distribution, ctx.rng)?;
    game.state.preset = setup.preset.to_string();
    game.state.ruleset = setup.ruleset;
    game.roles = ctx.registry.name_table(setup.distribution.keys().copied());

    let mut effects = Effects::new();
    let composition: Vec<String> = setup
        .distribution
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(role, count)| format!("{}×{}", game.role_name(*role), count))
        .collect();
    effects.broadcast(format!(
        "ゲーム開始！ {}人 / ルール: {} / 配役: {}",
        game.players.len(),
        game.state.ruleset,
        composition.join("、")
    ));

    let wolves: Vec<(String, String)> = game
        .players
        .iter()
        .filter(|p| p.is_wolf())
        .map(|p| (p.user_id.clone(), p.info()))
        .collect();
    for player in &game.players {
        let Some(role) = player.role else { continue };
        let mut text = format!(
            "あなたの役職は{}です。{}",
            game.role_name(role),
            role.description()
        );
        if role.is_wolf() {
            let mates: Vec<&str> = wolves
                .iter()
                .filter(|(id, _)| *id != player.user_id)
                .map(|(_, info)| info.as_str())
                .collect();
            if !mates.is_empty() {
                text.push_str(&format!("\n仲間: {}", mates.join("、")));
            }
        }
        effects.direct(&player.user_id, text);
    }

    info!(
        "Game started in session {} with {} players (preset {})",
        game.session_id,
        game.players.len(),
        game.state.preset
    );
    start_night(game, ctx, &mut effects);
    Ok(effects)
}

pub fn start_night(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    game.state.day += 1;
    game.state.night_actions.clear();
    game.state.wolf_target = None;
    game.state.votes.clear();
    game.state.runoff_candidates = None;
    for player in game.players.iter_mut() {
        player.clear_night_tags();
    }
    set_phase(
        game,
        GamePhase::NightWolves,
        Some(ctx.deadline_after(ctx.config.night_duration)),
    );

    effects.broadcast(format!(
        "第{}夜になりました。人狼・占い師・騎士は行動してください（{}秒）",
        game.state.day,
        ctx.config.night_duration.as_secs()
    ));
    for player in game.alive_players() {
        let Some(role) = player.role else { continue };
        if !ctx.registry.behavior(role).has_night_action() {
            continue;
        }
        if let Some(prompt) = night_prompt(role) {
            effects.direct(&player.user_id, prompt);
        }
    }
}

/// 人狼の投票を集計して襲撃対象を確定し、魔女に伝える
pub fn enter_witch_phase(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    game.state.wolf_target = tally_wolf_target(game, ctx.rng);
    set_phase(
        game,
        GamePhase::NightWitch,
        Some(ctx.deadline_after(ctx.config.witch_duration)),
    );
    effects.broadcast(format!(
        "魔女の行動時間です（{}秒）",
        ctx.config.witch_duration.as_secs()
    ));

    let Some(witch) = game.alive_with_role(Role::Witch) else {
        return;
    };
    let attacked = match &game.state.wolf_target {
        Some(target) => format!("今夜襲撃されたのは{}です。", game.label(target)),
        None => "今夜は誰も襲撃されませんでした。".to_string(),
    };
    let stock: Vec<String> = [Potion::Save, Potion::Poison]
        .iter()
        .map(|potion| {
            let status = if game.potions.is_available(*potion) {
                "あり"
            } else {
                "使用済み"
            };
            format!("{}: {}", potion.label(), status)
        })
        .collect();
    effects.direct(
        &witch.user_id,
        format!(
            "{}\n{}\n使う場合は薬の種類と席番号を送信してください。",
            attacked,
            stock.join(" / ")
        ),
    );
}

pub fn resolve_night_phase(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    let outcome = resolve_night(game, ctx.registry, ctx.rng);
    game.state.deadline = None;
    effects.broadcast(outcome.summary);

    if !outcome.abilities.is_empty() {
        game.state.pending_abilities.extend(outcome.abilities);
        game.state.ability_resume = Resume::Day;
        open_next_ability(game, ctx, effects);
    } else if outcome.winner.is_some() {
        end_game(game, effects);
    } else {
        start_day(game, ctx, effects);
    }
}

pub fn start_day(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    let order: Vec<String> = game.alive_players().map(|p| p.user_id.clone()).collect();
    let labels: Vec<String> = game.alive_players().map(|p| p.info()).collect();
    game.state.speaking_order = order;
    game.state.current_speaker = 0;
    set_phase(
        game,
        GamePhase::DaySpeak,
        Some(ctx.deadline_after(ctx.config.speech_duration)),
    );

    effects.broadcast(format!(
        "第{}日の昼になりました。発言順: {}",
        game.state.day,
        labels.join(" → ")
    ));
    announce_speaker(game, ctx, effects);
}

fn announce_speaker(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    match game.current_speaker().map(|p| (p.user_id.clone(), p.info())) {
        Some((user_id, label)) => {
            effects.broadcast(format!(
                "{}の発言です（{}秒）",
                label,
                ctx.config.speech_duration.as_secs()
            ));
            effects.direct(&user_id, "あなたの発言番です。終わったら発言終了を送信してください。");
        }
        None => start_vote(game, ctx, effects),
    }
}

/// 次の発言者に進む。全員終わったら投票へ
pub fn advance_speaker(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    let mut next = game.state.current_speaker + 1;
    while let Some(user_id) = game.state.speaking_order.get(next) {
        if game.player(user_id).map(|p| p.is_alive).unwrap_or(false) {
            break;
        }
        next += 1;
    }
    game.state.current_speaker = next;

    if next >= game.state.speaking_order.len() {
        start_vote(game, ctx, effects);
    } else {
        game.state.deadline = Some(ctx.deadline_after(ctx.config.speech_duration));
        announce_speaker(game, ctx, effects);
    }
}

/// 投票を始める。決選投票の候補者は呼び出し前に設定しておく
pub fn start_vote(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    game.state.votes.clear();
    set_phase(
        game,
        GamePhase::DayVote,
        Some(ctx.deadline_after(ctx.config.vote_duration)),
    );

    let mut text = match &game.state.runoff_candidates {
        Some(candidates) => {
            let names: Vec<String> = candidates.iter().map(|id| game.label(id)).collect();
            format!("決選投票です。候補者: {}", names.join("、"))
        }
        None => "投票の時間です。処刑したいプレイヤーの席番号を送信してください".to_string(),
    };
    text.push_str(&format!(
        "（00で棄権、{}秒）",
        ctx.config.vote_duration.as_secs()
    ));
    effects.broadcast(text);
}

pub fn resolve_vote_phase(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    let tie_policy = game.state.tie_policy;
    let outcome = resolve_votes(game, ctx.registry, ctx.rng, tie_policy);
    game.state.deadline = None;
    effects.broadcast(outcome.summary);

    match outcome.result {
        VoteResult::Runoff { candidates } => {
            game.state.runoff_candidates = Some(candidates);
            start_vote(game, ctx, effects);
        }
        VoteResult::IdiotRevealed { .. } => {
            set_phase(game, GamePhase::IdiotReveal, None);
            start_night(game, ctx, effects);
        }
        VoteResult::Eliminated { .. } if !outcome.abilities.is_empty() => {
            game.state.pending_abilities.extend(outcome.abilities);
            game.state.ability_resume = Resume::Night;
            open_next_ability(game, ctx, effects);
        }
        VoteResult::Eliminated { .. } | VoteResult::NoElimination => {
            if outcome.winner.is_some() {
                end_game(game, effects);
            } else {
                start_night(game, ctx, effects);
            }
        }
    }
}

/// 待機中の能力があればそのフェーズに入る。無ければ勝敗判定して再開する
pub fn open_next_ability(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    let Some(ability) = game.state.pending_abilities.front().cloned() else {
        finish_abilities(game, ctx, effects);
        return;
    };
    set_phase(
        game,
        ability.phase(),
        Some(ctx.deadline_after(ctx.config.ability_duration)),
    );
    effects.broadcast(format!(
        "{}が{}の能力を発動できます（{}秒）",
        game.label(&ability.actor),
        ability.kind,
        ctx.config.ability_duration.as_secs()
    ));
    effects.direct(
        &ability.actor,
        format!(
            "{}する相手の席番号を送信してください。使わない場合は00を送信してください。",
            ability.kind
        ),
    );
}

fn finish_abilities(game: &mut Game, ctx: &PhaseContext<'_>, effects: &mut Effects) {
    if game.winner().is_some() {
        end_game(game, effects);
        return;
    }
    match game.state.ability_resume {
        Resume::Day => start_day(game, ctx, effects),
        Resume::Night => start_night(game, ctx, effects),
    }
}

/// 能力の申請を検証し、対象の user_id を返す（None は放棄）
pub fn validate_ability(
    game: &Game,
    user_id: &str,
    kind: AbilityKind,
    target: Option<Slot>,
) -> Result<Option<String>, ValidationError> {
    game.ensure_phase(&[GamePhase::HunterShooting, GamePhase::WolfKingClawing])?;
    let pending = game
        .state
        .pending_abilities
        .front()
        .filter(|a| a.actor == user_id)
        .ok_or(ValidationError::NoPendingAbility)?;
    if pending.kind != kind {
        return Err(ValidationError::WrongRole);
    }
    let Some(slot) = target else {
        return Ok(None);
    };
    let target = game.living_target(slot)?;
    if target.user_id == user_id {
        return Err(ValidationError::SelfTarget);
    }
    Ok(Some(target.user_id.clone()))
}

/// 先頭の能力を解決する。撃たれた側の能力も連鎖して積む
pub fn resolve_ability(
    game: &mut Game,
    ctx: &PhaseContext<'_>,
    target: Option<String>,
    effects: &mut Effects,
) {
    let Some(PendingAbility { kind, actor, .. }) = game.state.pending_abilities.pop_front() else {
        finish_abilities(game, ctx, effects);
        return;
    };
    let actor_label = game.label(&actor);

    match target.filter(|t| game.player(t).map(|p| p.is_alive).unwrap_or(false)) {
        Some(target) => {
            let (event, cause, verb) = match kind {
                AbilityKind::Shoot => (EventKind::HunterShoot, DeathCause::Shot, "撃ちました"),
                AbilityKind::Claw => (EventKind::WolfKingClaw, DeathCause::Claw, "道連れにしました"),
            };
            game.kill(&target);
            game.record_event(event, Some(actor.as_str()), Some(target.as_str()));
            game.record_event(EventKind::Died { cause }, None, Some(target.as_str()));
            effects.broadcast(format!("{}が{}を{}", actor_label, game.label(&target), verb));

            let chained = game
                .player(&target)
                .and_then(|p| p.role)
                .and_then(|role| ctx.registry.behavior(role).on_death(&target, cause));
            if let Some(ability) = chained {
                game.state.pending_abilities.push_back(ability);
            }
        }
        None => {
            game.record_event(
                EventKind::AbilityDeclined { ability: kind },
                Some(actor.as_str()),
                None,
            );
            effects.broadcast(format!("{}は{}を行いませんでした", actor_label, kind));
        }
    }
    open_next_ability(game, ctx, effects);
}

/// 昼の発言中に人狼陣営が自爆する。投票は行わずに夜へ
pub fn self_destruct(
    game: &mut Game,
    ctx: &PhaseContext<'_>,
    user_id: &str,
) -> Result<Effects, ValidationError> {
    game.ensure_phase(&[GamePhase::DaySpeak])?;
    let player = game.living_actor(user_id)?;
    if !player.is_wolf() {
        return Err(ValidationError::WrongRole);
    }
    let role = player.role;
    let label = player.info();

    let mut effects = Effects::new();
    game.kill(user_id);
    game.record_event(EventKind::SelfDestruct, Some(user_id), None);
    game.record_event(
        EventKind::Died {
            cause: DeathCause::SelfDestruct,
        },
        None,
        Some(user_id),
    );
    game.state.deadline = None;
    effects.broadcast(format!("{}が自爆しました。投票は行われず夜になります", label));

    let ability =
        role.and_then(|r| ctx.registry.behavior(r).on_death(user_id, DeathCause::SelfDestruct));
    match ability {
        Some(ability) => {
            game.state.pending_abilities.push_back(ability);
            game.state.ability_resume = Resume::Night;
            open_next_ability(game, ctx, &mut effects);
        }
        None if game.winner().is_some() => end_game(game, &mut effects),
        None => start_night(game, ctx, &mut effects),
    }
    Ok(effects)
}

fn close_out(game: &mut Game, effects: &mut Effects) {
    set_phase(game, GamePhase::Ended, None);
    game.state.pending_abilities.clear();
    game.state.night_actions.clear();
    game.state.votes.clear();
    effects.broadcast(generate_recap(game));
    effects.broadcast(final_roles(game));
    effects.ended = true;
}

pub fn end_game(game: &mut Game, effects: &mut Effects) {
    let winner = game.winner();
    game.state.winner = winner;
    if let Some(team) = winner {
        info!("Session {} ended: {} wins", game.session_id, team);
        effects.broadcast(format!("ゲーム終了！ {}の勝利です", team));
    }
    close_out(game, effects);
}

/// ホスト・管理者・放置検出による強制終了
pub fn force_end(game: &mut Game, reason: &str) -> Effects {
    let mut effects = Effects::new();
    info!("Session {} force-ended: {}", game.session_id, reason);
    effects.broadcast(format!("ゲームは強制終了されました（{}）", reason));
    close_out(game, &mut effects);
    effects
}

/// 期限切れ時の既定の処理
pub fn on_timeout(game: &mut Game, ctx: &PhaseContext<'_>) -> Effects {
    let mut effects = Effects::new();
    match game.state.phase {
        GamePhase::NightWolves => enter_witch_phase(game, ctx, &mut effects),
        GamePhase::NightWitch => resolve_night_phase(game, ctx, &mut effects),
        GamePhase::DaySpeak => advance_speaker(game, ctx, &mut effects),
        GamePhase::DayVote => resolve_vote_phase(game, ctx, &mut effects),
        GamePhase::HunterShooting | GamePhase::WolfKingClawing => {
            resolve_ability(game, ctx, None, &mut effects)
        }
        GamePhase::Waiting | GamePhase::Starting | GamePhase::IdiotReveal | GamePhase::Ended => {
            game.state.deadline = None;
        }
    }
    effects
}

/// 人狼同士の相談。送信者以外の生存人狼に届ける
pub fn wolf_chat(game: &Game, user_id: &str, text: &str) -> Result<Effects, ValidationError> {
    game.ensure_phase(&[GamePhase::NightWolves])?;
    let sender = game.living_actor(user_id)?;
    if !sender.is_wolf() {
        return Err(ValidationError::WrongRole);
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }

    let mut effects = Effects::new();
    let message = format!("[人狼] {}: {}", sender.info(), text);
    for mate in game.alive_wolves().filter(|p| p.user_id != user_id) {
        effects.direct(&mate.user_id, message.clone());
    }
    Ok(effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::command::NightActionKind;
    use crate::models::game::{Ballot, NightAction};
    use crate::models::role::Team;
    use crate::models::rule::TiePolicy;
    use crate::utils::test_setup::{game_with_roles, ScriptedRandom};

    fn ctx<'a>(
        config: &'a GameConfig,
        registry: &'a RoleRegistry,
        rng: &'a ScriptedRandom,
    ) -> PhaseContext<'a> {
        PhaseContext {
            config,
            registry,
            rng,
            now: Utc::now(),
        }
    }

    fn attack(game: &mut Game, wolf: &str, target: &str) {
        game.state.night_actions.insert(
            wolf.to_string(),
            NightAction {
                role: Role::Werewolf,
                kind: NightActionKind::Kill,
                target: target.to_string(),
            },
        );
    }

    #[test]
    fn test_begin_game_briefs_wolves_with_teammates() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::with_role_order(vec![Role::Werewolf, Role::Werewolf]);
        let mut game = game_with_roles(&[Role::Villager; 6]);
        game.state.phase = GamePhase::Waiting;
        game.state.day = 0;
        for p in game.players.iter_mut() {
            p.role = None;
        }

        let effects = begin_game(&mut game, &ctx(&config, &registry, &rng)).unwrap();
        assert_eq!(game.phase(), GamePhase::NightWolves);
        assert_eq!(game.state.day, 1);
        assert!(game.state.deadline.is_some());
        assert!(game.players[0].has_role(Role::Werewolf));
        assert!(game.players[1].has_role(Role::Werewolf));

        let briefing = effects
            .notices
            .iter()
            .find_map(|n| match n {
                Notice::Direct { user_id, text } if user_id == "u1" && text.contains("役職") => {
                    Some(text.clone())
                }
                _ => None,
            })
            .unwrap();
        assert!(briefing.contains("人狼"));
        assert!(briefing.contains("P2(02番)"));
    }

    #[test]
    fn test_begin_game_rejects_unsupported_count() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::default();
        let mut game = game_with_roles(&[Role::Villager; 2]);
        game.state.phase = GamePhase::Waiting;

        let result = begin_game(&mut game, &ctx(&config, &registry, &rng));
        assert!(matches!(
            result,
            Err(GameError::Validation(ValidationError::UnsupportedPlayerCount(2)))
        ));
    }

    #[test]
    fn test_witch_phase_freezes_target_and_prompts() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::default();
        let mut game = game_with_roles(&[Role::Werewolf, Role::Witch, Role::Villager, Role::Villager]);
        attack(&mut game, "u1", "u3");

        let mut effects = Effects::new();
        enter_witch_phase(&mut game, &ctx(&config, &registry, &rng), &mut effects);
        assert_eq!(game.phase(), GamePhase::NightWitch);
        assert_eq!(game.state.wolf_target.as_deref(), Some("u3"));
        assert!(effects.notices.iter().any(|n| matches!(
            n,
            Notice::Direct { user_id, text } if user_id == "u2" && text.contains("P3(03番)") && text.contains("救命薬: あり")
        )));
    }

    #[test]
    fn test_hunter_death_opens_ability_then_day() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::default();
        let mut game = game_with_roles(&[
            Role::Werewolf,
            Role::Werewolf,
            Role::Hunter,
            Role::Villager,
            Role::Villager,
            Role::Seer,
        ]);
        attack(&mut game, "u1", "u3");
        game.state.phase = GamePhase::NightWitch;
        let context = ctx(&config, &registry, &rng);

        let mut effects = Effects::new();
        resolve_night_phase(&mut game, &context, &mut effects);
        assert_eq!(game.phase(), GamePhase::HunterShooting);
        assert_eq!(game.state.ability_resume, Resume::Day);

        let target = validate_ability(&game, "u3", AbilityKind::Shoot, Slot::new(1)).unwrap();
        assert_eq!(
            validate_ability(&game, "u4", AbilityKind::Shoot, Slot::new(1)),
            Err(ValidationError::NoPendingAbility)
        );
        resolve_ability(&mut game, &context, target, &mut effects);
        assert!(!game.player("u1").unwrap().is_alive);
        assert_eq!(game.phase(), GamePhase::DaySpeak);
        assert_eq!(game.state.speaking_order.len(), 4);
    }

    #[test]
    fn test_ability_chain_hunter_shoots_wolf_king() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::default();
        let mut game = game_with_roles(&[
            Role::WolfKing,
            Role::Werewolf,
            Role::Hunter,
            Role::Villager,
            Role::Villager,
            Role::Seer,
            Role::Villager,
        ]);
        let context = ctx(&config, &registry, &rng);
        game.state.phase = GamePhase::DayVote;
        game.state.pending_abilities.push_back(PendingAbility {
            kind: AbilityKind::Shoot,
            actor: "u3".to_string(),
            cause: DeathCause::Vote,
        });
        game.kill("u3");
        game.state.ability_resume = Resume::Night;
        let mut effects = Effects::new();
        open_next_ability(&mut game, &context, &mut effects);
        assert_eq!(game.phase(), GamePhase::HunterShooting);

        resolve_ability(&mut game, &context, Some("u1".to_string()), &mut effects);
        assert_eq!(game.phase(), GamePhase::WolfKingClawing);
        assert_eq!(game.state.pending_abilities.front().unwrap().actor, "u1");

        // 時間切れで道連れは放棄され、夜に進む
        let effects = on_timeout(&mut game, &context);
        assert_eq!(game.phase(), GamePhase::NightWolves);
        assert!(effects
            .notices
            .contains(&Notice::Broadcast("P1(01番)は道連れを行いませんでした".to_string())));
    }

    #[test]
    fn test_runoff_restarts_vote_with_candidates() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::default();
        let mut game = game_with_roles(&[
            Role::Werewolf,
            Role::Villager,
            Role::Villager,
            Role::Seer,
            Role::Werewolf,
            Role::Villager,
        ]);
        game.state.tie_policy = TiePolicy::Runoff;
        game.state.phase = GamePhase::DayVote;
        game.state.votes.insert("u1".into(), Ballot::Target("u2".into()));
        game.state.votes.insert("u2".into(), Ballot::Target("u1".into()));
        let context = ctx(&config, &registry, &rng);

        let mut effects = Effects::new();
        resolve_vote_phase(&mut game, &context, &mut effects);
        assert_eq!(game.phase(), GamePhase::DayVote);
        assert_eq!(
            game.state.runoff_candidates,
            Some(vec!["u1".to_string(), "u2".to_string()])
        );

        // 決選投票でも同数なら誰も処刑されない
        game.state.votes.insert("u3".into(), Ballot::Target("u2".into()));
        game.state.votes.insert("u4".into(), Ballot::Target("u1".into()));
        resolve_vote_phase(&mut game, &context, &mut effects);
        assert_eq!(game.phase(), GamePhase::NightWolves);
        assert!(game.players.iter().all(|p| p.is_alive));
        assert_eq!(game.state.runoff_candidates, None);
    }

    #[test]
    fn test_idiot_reveal_passes_to_night() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::default();
        let mut game = game_with_roles(&[Role::Werewolf, Role::Idiot, Role::Villager, Role::Seer]);
        game.state.phase = GamePhase::DayVote;
        game.state.votes.insert("u1".into(), Ballot::Target("u2".into()));
        game.state.votes.insert("u3".into(), Ballot::Target("u2".into()));
        let day = game.state.day;

        let mut effects = Effects::new();
        resolve_vote_phase(&mut game, &ctx(&config, &registry, &rng), &mut effects);
        assert_eq!(game.phase(), GamePhase::NightWolves);
        assert_eq!(game.state.day, day + 1);
        assert!(game.player("u2").unwrap().is_alive);
        assert!(!game.player("u2").unwrap().can_vote());
    }

    #[test]
    fn test_self_destruct_skips_vote() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::default();
        let mut game = game_with_roles(&[
            Role::WhiteWolfKing,
            Role::Werewolf,
            Role::Villager,
            Role::Seer,
            Role::Witch,
            Role::Villager,
        ]);
        let context = ctx(&config, &registry, &rng);
        let mut effects = Effects::new();
        start_day(&mut game, &context, &mut effects);

        assert_eq!(
            self_destruct(&mut game, &context, "u3").unwrap_err(),
            ValidationError::WrongRole
        );
        self_destruct(&mut game, &context, "u1").unwrap();
        assert!(!game.player("u1").unwrap().is_alive);
        assert_eq!(game.phase(), GamePhase::WolfKingClawing);

        let target = validate_ability(&game, "u1", AbilityKind::Claw, Slot::new(4)).unwrap();
        resolve_ability(&mut game, &context, target, &mut effects);
        assert!(!game.player("u4").unwrap().is_alive);
        assert_eq!(game.phase(), GamePhase::NightWolves);
    }

    #[test]
    fn test_speaker_rotation_then_vote() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::default();
        let mut game = game_with_roles(&[Role::Werewolf, Role::Villager, Role::Seer]);
        let context = ctx(&config, &registry, &rng);
        let mut effects = Effects::new();
        start_day(&mut game, &context, &mut effects);
        assert_eq!(game.current_speaker().unwrap().user_id, "u1");

        advance_speaker(&mut game, &context, &mut effects);
        assert_eq!(game.current_speaker().unwrap().user_id, "u2");
        on_timeout(&mut game, &context);
        assert_eq!(game.current_speaker().unwrap().user_id, "u3");
        on_timeout(&mut game, &context);
        assert_eq!(game.phase(), GamePhase::DayVote);
    }

    #[test]
    fn test_wolf_win_after_night_ends_game() {
        let config = GameConfig::default();
        let registry = RoleRegistry::standard();
        let rng = ScriptedRandom::default();
        let mut game = game_with_roles(&[Role::Werewolf, Role::Villager, Role::Villager]);
        attack(&mut game, "u1", "u2");
        game.state.phase = GamePhase::NightWitch;

        let mut effects = Effects::new();
        resolve_night_phase(&mut game, &ctx(&config, &registry, &rng), &mut effects);
        assert_eq!(game.phase(), GamePhase::Ended);
        assert_eq!(game.state.winner, Some(Team::Wolf));
        assert!(effects.ended);
        assert_eq!(game.state.deadline, None);
        assert!(effects
            .notices
            .iter()
            .any(|n| matches!(n, Notice::Broadcast(t) if t.contains("最終配役"))));
    }

    #[test]
    fn test_wolf_chat_reaches_other_wolves_only() {
        let game = game_with_roles(&[Role::Werewolf, Role::WolfKing, Role::Seer]);
        let effects = wolf_chat(&game, "u1", "3番を狙おう").unwrap();
        assert_eq!(
            effects.notices,
            vec![Notice::Direct {
                user_id: "u2".to_string(),
                text: "[人狼] P1(01番): 3番を狙おう".to_string()
            }]
        );
        assert_eq!(wolf_chat(&game, "u3", "hi").unwrap_err(), ValidationError::WrongRole);
        assert_eq!(wolf_chat(&game, "u1", "  ").unwrap_err(), ValidationError::EmptyMessage);
    }
}
