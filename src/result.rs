use crate::state::{Innings, InningsEnd, MatchResult};

/// Termination check run after every ball. Reaching the target wins over the other two
/// conditions, so a winning run completed on a run-out still counts as the chase completed.
pub fn innings_end(innings: &Innings) -> Option<InningsEnd> {
    if let Some(target) = innings.target
        && innings.runs >= target
    {
        return Some(InningsEnd::TargetReached);
    }
    if innings.wickets >= innings.wicket_cap {
        return Some(InningsEnd::AllOut);
    }
    if innings.legal_balls >= innings.ball_limit {
        return Some(InningsEnd::OversComplete);
    }
    None
}

/// Decides the match once the chase has ended. Returns `None` for a first innings, or for a
/// chase that is still in progress.
pub fn match_result(chase: &Innings) -> Option<MatchResult> {
    if chase.first_innings || !chase.is_ended() {
        return None;
    }
    let target = chase.target?;
    let result = if chase.runs >= target {
        MatchResult::WonByWickets {
            winner: chase.batting_team,
            margin: chase.wicket_cap.saturating_sub(chase.wickets),
        }
    } else if chase.runs + 1 == target {
        MatchResult::Tie
    } else {
        MatchResult::WonByRuns {
            winner: chase.bowling_team,
            margin: target - chase.runs - 1,
        }
    };
    Some(result)
}
