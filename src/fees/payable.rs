use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub amount: f64,
    pub concession_applicable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    pub base_amount: f64,
    pub concession_amount: f64,
    pub late_fee: f64,
    pub waived_off_amount: f64,
    pub total_payable: f64,
}

/// `max(0, round(base - concession + late_fee - waiver))`. The slab rate only
/// touches components marked concession-applicable.
pub fn compute(components: &[Component], slab_rate: Option<f64>, late_fee: f64, waiver: f64) -> Breakdown {
    let base: f64 = components.iter().map(|c| c.amount).sum();
    let concession = match slab_rate {
        Some(rate) => {
            let eligible: f64 = components
                .iter()
                .filter(|c| c.concession_applicable)
                .map(|c| c.amount)
                .sum();
            eligible * rate / 100.0
        }
        None => 0.0,
    };
    let total = (base - concession + late_fee - waiver).round().max(0.0);
    Breakdown {
        base_amount: base,
        concession_amount: concession,
        late_fee,
        waived_off_amount: waiver,
        total_payable: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(amount: f64, concession_applicable: bool) -> Component {
        Component {
            amount,
            concession_applicable,
        }
    }

    #[test]
    fn concession_only_on_applicable_components() {
        let b = compute(&[c(10_000.0, true), c(2_000.0, false)], Some(25.0), 0.0, 0.0);
        assert_eq!(b.base_amount, 12_000.0);
        assert_eq!(b.concession_amount, 2_500.0);
        assert_eq!(b.total_payable, 9_500.0);
    }

    #[test]
    fn late_fee_and_waiver_adjust_total() {
        let b = compute(&[c(5_000.0, true)], None, 150.0, 1_000.0);
        assert_eq!(b.total_payable, 4_150.0);
    }

    #[test]
    fn total_is_rounded_and_never_negative() {
        assert_eq!(compute(&[c(100.4, true)], None, 0.0, 0.0).total_payable, 100.0);
        assert_eq!(compute(&[c(100.5, true)], None, 0.0, 0.0).total_payable, 101.0);
        assert_eq!(compute(&[c(500.0, true)], Some(10.0), 0.0, 900.0).total_payable, 0.0);
    }
}
