use super::RegistrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionStatus {
    Pending,
    RequestCorrection,
    OnlineRegistrationDone,
    PhysicalRegistrationDone,
    Approved,
    Rejected,
}

impl CorrectionStatus {
    pub const ALL: [CorrectionStatus; 6] = [
        Self::Pending,
        Self::RequestCorrection,
        Self::OnlineRegistrationDone,
        Self::PhysicalRegistrationDone,
        Self::Approved,
        Self::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::RequestCorrection => "REQUEST_CORRECTION",
            Self::OnlineRegistrationDone => "ONLINE_REGISTRATION_DONE",
            Self::PhysicalRegistrationDone => "PHYSICAL_REGISTRATION_DONE",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, RegistrationError> {
        let t = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == t)
            .ok_or_else(|| RegistrationError::UnknownStatus(s.to_string()))
    }

    fn successors(self) -> &'static [CorrectionStatus] {
        use CorrectionStatus::*;
        match self {
            Pending => &[RequestCorrection, OnlineRegistrationDone, Approved, Rejected],
            RequestCorrection => &[Pending, OnlineRegistrationDone, Rejected],
            OnlineRegistrationDone => &[
                PhysicalRegistrationDone,
                RequestCorrection,
                Approved,
                Rejected,
            ],
            PhysicalRegistrationDone => &[RequestCorrection, Approved, Rejected],
            Approved => &[],
            Rejected => &[RequestCorrection],
        }
    }

    /// Staying put is always allowed, except that nothing leaves APPROVED.
    pub fn transition(self, to: CorrectionStatus) -> Result<CorrectionStatus, RegistrationError> {
        if self == to || self.successors().contains(&to) {
            Ok(to)
        } else {
            Err(RegistrationError::InvalidTransition { from: self, to })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CorrectionStatus::*;
    use super::*;

    #[test]
    fn approved_is_terminal() {
        for to in CorrectionStatus::ALL {
            if to != Approved {
                assert!(Approved.transition(to).is_err(), "{:?}", to);
            }
        }
    }

    #[test]
    fn rejected_only_reopens_for_correction() {
        assert_eq!(Rejected.transition(RequestCorrection).unwrap(), RequestCorrection);
        assert!(Rejected.transition(Approved).is_err());
        assert!(Rejected.transition(Pending).is_err());
    }

    #[test]
    fn parse_is_case_insensitive_and_rejects_unknown() {
        assert_eq!(CorrectionStatus::parse("online_registration_done").unwrap(), OnlineRegistrationDone);
        assert_eq!(
            CorrectionStatus::parse("DONE").unwrap_err().code(),
            "bad_params"
        );
    }
}
