//! Klein-Nishina kinematics and cross section used by the forced-
//! detection table build and scatter sampler (§4.6).

const ELECTRON_REST_MASS_KEV: f64 = 511.0;

/// Outgoing Compton energy given the incoming energy and the cosine of
/// the scattering angle.
pub fn compton_energy_out(e_in_kev: f64, cos_theta_scat: f64) -> f64 {
    e_in_kev / (1.0 + (e_in_kev / ELECTRON_REST_MASS_KEV) * (1.0 - cos_theta_scat))
}

/// The (unnormalized) differential Klein-Nishina cross section as a
/// function of the incoming/outgoing energies and the scattering angle.
pub fn kn_density(e_in_kev: f64, e_out_kev: f64, cos_theta_scat: f64) -> f64 {
    let r = e_out_kev / e_in_kev;
    0.5 * r * r * (r + 1.0 / r - 1.0 + cos_theta_scat * cos_theta_scat)
}

/// The closed-form total Klein-Nishina cross section (integrated over
/// solid angle) at incoming energy `e_in_kev`, used to normalize the
/// forced-detection reweighting.
pub fn total_kn(e_in_kev: f64) -> f64 {
    let a = e_in_kev / ELECTRON_REST_MASS_KEV;
    let two_a_plus_one = 2.0 * a + 1.0;
    let ln_term = two_a_plus_one.ln();
    let term1 = (a + 1.0) / a.powi(3) * (2.0 * a * (a + 1.0) / two_a_plus_one - ln_term);
    let term2 = ln_term / (2.0 * a);
    let term3 = (3.0 * a + 1.0) / (two_a_plus_one * two_a_plus_one);
    2.0 * std::f64::consts::PI * (term1 + term2 - term3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn compton_energy_out_unchanged_for_forward_scatter() {
        assert_abs_diff_eq!(compton_energy_out(511.0, 1.0), 511.0, epsilon = 1e-9);
    }

    #[test]
    fn compton_energy_out_decreases_with_backscatter() {
        let forward = compton_energy_out(511.0, 1.0);
        let back = compton_energy_out(511.0, -1.0);
        assert!(back < forward);
    }

    #[test]
    fn kn_density_is_one_at_forward_scatter_unity_ratio() {
        assert_abs_diff_eq!(kn_density(511.0, 511.0, 1.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn total_kn_is_positive_and_decreases_with_energy() {
        let low = total_kn(50.0);
        let high = total_kn(511.0);
        assert!(low > 0.0);
        assert!(high > 0.0);
        assert!(high < low, "Klein-Nishina cross section should fall with energy");
    }
}
