use crate::models::{
    event::{EventKind, EventPhase, GameEvent},
    game::Game,
};

fn describe(game: &Game, event: &GameEvent) -> String {
    let actor = event
        .actor
        .as_deref()
        .map(|id| game.label(id))
        .unwrap_or_default();
    let target = event
        .target
        .as_deref()
        .map(|id| game.label(id))
        .unwrap_or_default();

    match &event.kind {
        EventKind::GuardProtect => format!("騎士 {} が {} を護衛", actor, target),
        EventKind::SeerCheck { is_wolf } => format!(
            "占い師 {} が {} を占った（{}）",
            actor,
            target,
            if *is_wolf { "人狼" } else { "人狼ではない" }
        ),
        EventKind::WerewolfAttack => format!("人狼が {} を襲撃", target),
        EventKind::WitchSave => format!("魔女 {} が {} に救命薬を使用", actor, target),
        EventKind::WitchKill => format!("魔女 {} が {} に毒薬を使用", actor, target),
        EventKind::Died { cause } => format!("{} が死亡（{}）", target, cause),
        EventKind::VoteOut { votes } => format!("{} が{}票で処刑", target, votes),
        EventKind::IdiotReveal => format!("{} が愚者であることを公開", target),
        EventKind::HunterShoot => format!("ハンター {} が {} を銃撃", actor, target),
        EventKind::WolfKingClaw => format!("狼王 {} が {} を道連れ", actor, target),
        EventKind::AbilityDeclined { ability } => {
            format!("{} は{}を行わなかった", actor, ability)
        }
        EventKind::SelfDestruct => format!("{} が自爆", actor),
    }
}

/// イベントログを日ごと・夜昼ごとにまとめる
pub fn generate_recap(game: &Game) -> String {
    let mut lines = vec!["=== ゲームの振り返り ===".to_string()];
    if game.event_log.is_empty() {
        lines.push("記録された出来事はありません".to_string());
        return lines.join("\n");
    }

    for (day, events) in game.event_log.by_day() {
        for phase in [EventPhase::Night, EventPhase::Day] {
            let entries: Vec<String> = events
                .iter()
                .filter(|e| e.phase == phase)
                .map(|e| format!("・{}", describe(game, e)))
                .collect();
            if entries.is_empty() {
                continue;
            }
            let label = match phase {
                EventPhase::Night => "夜",
                EventPhase::Day => "昼",
            };
            lines.push(format!("【{}日目 {}】", day, label));
            lines.extend(entries);
        }
    }
    lines.join("\n")
}

pub fn final_roles(game: &Game) -> String {
    let mut lines = vec!["=== 最終配役 ===".to_string()];
    for player in &game.players {
        let role = player
            .role
            .map(|r| game.role_name(r))
            .unwrap_or_else(|| "未配役".to_string());
        let status = if player.is_alive { "生存" } else { "死亡" };
        lines.push(format!("{}: {}（{}）", player.info(), role, status));
    }
    lines.join("\n")
}
