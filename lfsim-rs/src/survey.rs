//! Survey scheduling state machine.
//!
//! Elimination programmes stop treatment only after a pre-TAS survey passes
//! and the TAS survey then passes three times in a row
//! (https://www.who.int/publications/i/item/9789241501484). Failing either
//! survey re-enables treatment and pushes the next survey one inter-survey
//! interval into the future.

/// Month value meaning "no survey scheduled".
pub const NEVER: i32 = 99_999_999;

/// Months that must elapse between an MDA round and the first pre-TAS survey.
pub const MIN_MONTHS_BEFORE_SURVEY: i32 = 6;

/// Consecutive TAS passes required to stop surveying for good.
pub const NEEDED_TAS_PASSES: u32 = 3;

/// Survey timers and treatment gating for one replicate. Persists across
/// scenario segments; reset at the start of each replicate.
#[derive(Debug, Clone)]
pub struct SurveyState {
    pub pre_tas_survey_time: i32,
    pub tas_survey_time: i32,
    /// Consecutive TAS passes; zeroed on any failure.
    pub tas_pass: u32,
    pub pre_tas_pass: bool,
    /// Whether MDA rounds actually treat anyone. Rounds still occur for
    /// bookkeeping when this is false.
    pub do_mda: bool,
}

impl Default for SurveyState {
    fn default() -> Self {
        SurveyState::new()
    }
}

impl SurveyState {
    pub fn new() -> SurveyState {
        SurveyState {
            pre_tas_survey_time: NEVER,
            tas_survey_time: NEVER,
            tas_pass: 0,
            pre_tas_pass: false,
            do_mda: true,
        }
    }

    pub fn pre_tas_due(&self, month: i32) -> bool {
        month == self.pre_tas_survey_time
    }

    pub fn tas_due(&self, month: i32) -> bool {
        month == self.tas_survey_time
    }

    /// Schedules the first pre-TAS survey once enough MDA rounds have been
    /// delivered: no earlier than the programme's survey start date and at
    /// least [`MIN_MONTHS_BEFORE_SURVEY`] after the triggering round.
    pub fn schedule_first_pre_tas(&mut self, month: i32, survey_start_date: i32) {
        self.pre_tas_survey_time = survey_start_date.max(month + MIN_MONTHS_BEFORE_SURVEY);
    }

    /// Applies a pre-TAS outcome. A pass makes the TAS due this same month
    /// and suspends treatment; a fail reschedules the pre-TAS one interval
    /// ahead and keeps treatment enabled.
    pub fn record_pre_tas(&mut self, month: i32, passed: bool, interval: i32) {
        self.pre_tas_pass = passed;
        if passed {
            self.tas_survey_time = month;
            self.do_mda = false;
        } else {
            self.pre_tas_survey_time = month + interval;
            self.do_mda = true;
        }
    }

    /// Applies a TAS outcome. Returns true when the terminal state is
    /// reached (enough consecutive passes; no further surveys scheduled).
    pub fn record_tas(&mut self, month: i32, passed: bool, interval: i32) -> bool {
        if !passed {
            self.tas_pass = 0;
            self.pre_tas_survey_time = month + interval;
            self.tas_survey_time = month + interval;
            self.do_mda = true;
            return false;
        }
        self.tas_pass += 1;
        if self.tas_pass >= NEEDED_TAS_PASSES {
            self.tas_survey_time = NEVER;
            true
        } else {
            self.tas_survey_time = month + interval;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: i32 = 12;

    #[test]
    fn starts_with_no_surveys_scheduled_and_treatment_on() {
        let s = SurveyState::new();
        assert!(s.do_mda);
        assert_eq!(s.tas_pass, 0);
        assert!(!s.pre_tas_due(0));
        assert!(!s.tas_due(0));
    }

    #[test]
    fn first_pre_tas_respects_start_date_and_lead_time() {
        let mut s = SurveyState::new();
        s.schedule_first_pre_tas(60, 144);
        assert_eq!(s.pre_tas_survey_time, 144);

        let mut s = SurveyState::new();
        s.schedule_first_pre_tas(150, 144);
        assert_eq!(s.pre_tas_survey_time, 156);
    }

    #[test]
    fn pre_tas_pass_schedules_tas_same_month_and_stops_mda() {
        let mut s = SurveyState::new();
        s.pre_tas_survey_time = 100;
        s.record_pre_tas(100, true, INTERVAL);
        assert_eq!(s.tas_survey_time, 100);
        assert!(!s.do_mda);
        assert_eq!(s.tas_pass, 0);
    }

    #[test]
    fn pre_tas_fail_reschedules_and_keeps_mda() {
        let mut s = SurveyState::new();
        s.pre_tas_survey_time = 100;
        s.record_pre_tas(100, false, INTERVAL);
        assert_eq!(s.pre_tas_survey_time, 112);
        assert!(s.do_mda);
        assert_eq!(s.tas_pass, 0);
    }

    #[test]
    fn three_consecutive_tas_passes_reach_terminal_state() {
        let mut s = SurveyState::new();
        s.record_pre_tas(100, true, INTERVAL);

        assert!(!s.record_tas(100, true, INTERVAL));
        assert_eq!(s.tas_survey_time, 112);
        assert!(!s.record_tas(112, true, INTERVAL));
        assert_eq!(s.tas_survey_time, 124);
        assert!(s.record_tas(124, true, INTERVAL));

        assert_eq!(s.tas_pass, NEEDED_TAS_PASSES);
        assert_eq!(s.tas_survey_time, NEVER);
        // No survey will ever be due again.
        for month in 124..2_000 {
            assert!(!s.tas_due(month + 1));
        }
    }

    #[test]
    fn tas_fail_zeroes_counter_and_resumes_mda() {
        let mut s = SurveyState::new();
        s.record_pre_tas(100, true, INTERVAL);
        s.record_tas(100, true, INTERVAL);
        assert_eq!(s.tas_pass, 1);

        assert!(!s.record_tas(112, false, INTERVAL));
        assert_eq!(s.tas_pass, 0);
        assert_eq!(s.pre_tas_survey_time, 124);
        assert_eq!(s.tas_survey_time, 124);
        assert!(s.do_mda);
    }
}
