use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::role::Role;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 同数時の抽選と配役のシャッフルに使う乱数源
pub trait RandomSource: Send + Sync {
    /// 0..len の範囲から一つ選ぶ。len は 1 以上
    fn pick_index(&self, len: usize) -> usize;
    fn shuffle_roles(&self, roles: &mut [Role]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn pick_index(&self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        rand::thread_rng().gen_range(0..len)
    }

    fn shuffle_roles(&self, roles: &mut [Role]) {
        roles.shuffle(&mut rand::thread_rng());
    }
}
