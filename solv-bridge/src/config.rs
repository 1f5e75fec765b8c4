use crate::context::SolveContext;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use solv_lsolver::{KrylovBackend, LinearSolverBackend, PreconditionerKind, SolverKind, DEFAULT_GMRES_RESTART};

/// Solver block of the input deck, keywords not yet resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub solver: String,
    pub preconditioner: String,
    /// Numeric options of the preconditioner block (`omega`, `level`), in order.
    pub precond_options: Vec<(String, f64)>,
    pub atol: f64,
    pub rtol: f64,
    pub divtol: f64,
    /// Print residuals.
    pub impr: bool,
    pub save_matrix_mtx_format: bool,
    pub mixed_precision: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solver: "GCP".to_string(),
            preconditioner: "none".to_string(),
            precond_options: Vec::new(),
            atol: 1e-12,
            rtol: 1e-12,
            divtol: 1e3,
            impr: false,
            save_matrix_mtx_format: false,
            mixed_precision: false,
        }
    }
}

/// Resolves a solver keyword, ignoring case.
pub fn resolve_solver(keyword: &str) -> core::result::Result<SolverKind, ConfigError> {
    match keyword.to_ascii_uppercase().as_str() {
        "GCP" | "CG" => Ok(SolverKind::Cg),
        "BICGSTAB" => Ok(SolverKind::BiCgStab),
        "GMRES" => Ok(SolverKind::Gmres {
            restart: DEFAULT_GMRES_RESTART,
        }),
        _ => Err(ConfigError::UnknownSolver(keyword.to_string())),
    }
}

/// Resolves a preconditioner keyword, ignoring case.
pub fn resolve_preconditioner(keyword: &str) -> core::result::Result<PreconditionerKind, ConfigError> {
    match keyword.to_ascii_lowercase().as_str() {
        "jacobi" | "diag" => Ok(PreconditionerKind::Jacobi),
        "none" => Ok(PreconditionerKind::None),
        _ => Err(ConfigError::UnknownPreconditioner(keyword.to_string())),
    }
}

struct Tokens<'a> {
    inner: std::vec::IntoIter<&'a str>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        let tokens: Vec<&str> = text
            .split_whitespace()
            .flat_map(split_braces)
            .collect();
        Self {
            inner: tokens.into_iter(),
        }
    }

    fn next(&mut self, reading: &str) -> core::result::Result<&'a str, ConfigError> {
        self.inner
            .next()
            .ok_or_else(|| ConfigError::UnexpectedEnd(reading.to_string()))
    }

    fn expect(&mut self, expected: &str) -> core::result::Result<(), ConfigError> {
        let found = self.next(expected)?;
        if found != expected {
            return Err(ConfigError::Expected {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    fn number(&mut self, keyword: &str) -> core::result::Result<f64, ConfigError> {
        let value = self.next(keyword)?;
        value.parse().map_err(|_| ConfigError::InvalidNumber {
            keyword: keyword.to_string(),
            value: value.to_string(),
        })
    }
}

/// `{a}` and `a{` are read as separate tokens.
fn split_braces(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in word.char_indices() {
        if c == '{' || c == '}' {
            if start < i {
                parts.push(&word[start..i]);
            }
            parts.push(&word[i..i + 1]);
            start = i + 1;
        }
    }
    if start < word.len() {
        parts.push(&word[start..]);
    }
    parts
}

impl SolverConfig {
    /// Reads a solver block:
    /// `SOLVER { [precond NAME { [option value]... }] [impr] [seuil|atol x] [rtol x] [divtol x] [save_matrix_mtx_format] [mixed_precision] }`.
    pub fn parse_block(text: &str) -> core::result::Result<Self, ConfigError> {
        let mut tokens = Tokens::new(text);
        let mut config = SolverConfig {
            solver: tokens.next("solver name")?.to_string(),
            ..SolverConfig::default()
        };
        resolve_solver(&config.solver)?;
        tokens.expect("{")?;
        loop {
            let keyword = tokens.next("solver options")?;
            match keyword.to_ascii_lowercase().as_str() {
                "}" => break,
                "impr" => config.impr = true,
                "seuil" | "atol" => config.atol = tokens.number(keyword)?,
                "rtol" => config.rtol = tokens.number(keyword)?,
                "divtol" => config.divtol = tokens.number(keyword)?,
                "save_matrix_mtx_format" => config.save_matrix_mtx_format = true,
                "mixed_precision" => config.mixed_precision = true,
                "precond" => {
                    config.preconditioner = tokens.next("precond")?.to_string();
                    resolve_preconditioner(&config.preconditioner)?;
                    tokens.expect("{")?;
                    loop {
                        let option = tokens.next("precond options")?;
                        if option == "}" {
                            break;
                        }
                        let value = tokens.number(option)?;
                        config.precond_options.push((option.to_string(), value));
                    }
                }
                _ => {
                    return Err(ConfigError::UnknownKeyword {
                        keyword: keyword.to_string(),
                        solver: config.solver.clone(),
                    })
                }
            }
        }
        Ok(config)
    }

    pub fn from_json(json: &str) -> core::result::Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn solver_kind(&self) -> core::result::Result<SolverKind, ConfigError> {
        resolve_solver(&self.solver)
    }

    pub fn preconditioner_kind(&self) -> core::result::Result<PreconditionerKind, ConfigError> {
        resolve_preconditioner(&self.preconditioner)
    }

    pub fn validate(&self) -> core::result::Result<(), ConfigError> {
        if self.mixed_precision {
            return Err(ConfigError::MixedPrecision);
        }
        for (name, value) in [("atol", self.atol), ("rtol", self.rtol), ("divtol", self.divtol)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidTolerance { name, value });
            }
        }
        self.solver_kind()?;
        self.preconditioner_kind()?;
        Ok(())
    }

    /// Resolves the keywords into a backend ready for `set_operator` and the
    /// matching solve context.
    pub fn build(&self) -> Result<(KrylovBackend, SolveContext)> {
        self.validate()?;
        let kind = self.solver_kind()?;
        let preconditioner = self.preconditioner_kind()?;
        for (option, value) in &self.precond_options {
            log::warn!(
                "Option {} {} ignored by the {} preconditioner",
                option,
                value,
                self.preconditioner
            );
        }
        let mut backend = KrylovBackend::new(kind, preconditioner);
        backend.init_tolerances(self.atol, self.rtol, self.divtol);

        let mut context = SolveContext::new(self.atol, self.rtol, self.divtol);
        context.print_residuals = self.impr;
        context.save_matrix_mtx_format = self.save_matrix_mtx_format;
        log::info!(
            "Solver {} with preconditioner {} (atol={:e} rtol={:e} divtol={:e})",
            kind.name(),
            self.preconditioner,
            self.atol,
            self.rtol,
            self.divtol
        );
        Ok((backend, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_parse_block() {
        let config = SolverConfig::parse_block(
            "GCP { precond jacobi { } seuil 1e-10 rtol 1.e-8 impr save_matrix_mtx_format }",
        )
        .unwrap();
        assert_eq!(config.solver, "GCP");
        assert_eq!(config.preconditioner, "jacobi");
        assert_eq!(config.atol, 1e-10);
        assert_eq!(config.rtol, 1e-8);
        assert!(config.impr);
        assert!(config.save_matrix_mtx_format);
        assert_eq!(config.solver_kind().unwrap(), SolverKind::Cg);
        assert_eq!(config.preconditioner_kind().unwrap(), PreconditionerKind::Jacobi);
    }

    #[test]
    fn test_parse_block_with_glued_braces_and_option() {
        let config = SolverConfig::parse_block("gmres{precond diag{omega 1.6}atol 1e-9}").unwrap();
        assert_eq!(
            config.solver_kind().unwrap(),
            SolverKind::Gmres {
                restart: DEFAULT_GMRES_RESTART
            }
        );
        assert_eq!(config.precond_options, vec![("omega".to_string(), 1.6)]);
        assert_eq!(config.atol, 1e-9);
    }

    #[test]
    fn test_parse_block_reads_every_precond_option() {
        let config = SolverConfig::parse_block(
            "BICGSTAB { precond jacobi { omega 0.8 level 2 } rtol 1e-7 impr }",
        )
        .unwrap();
        assert_eq!(
            config.precond_options,
            vec![("omega".to_string(), 0.8), ("level".to_string(), 2.0)]
        );
        assert_eq!(config.rtol, 1e-7);
        assert!(config.impr);
        config.build().unwrap();

        match SolverConfig::parse_block("GCP { precond jacobi { omega 0.8 level } }") {
            Err(ConfigError::InvalidNumber { keyword, value }) => {
                assert_eq!(keyword, "level");
                assert_eq!(value, "}");
            }
            other => panic!("Expected an invalid number error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_keyword_names_it() {
        match SolverConfig::parse_block("BICGSTAB { tolerance 1e-3 }") {
            Err(ConfigError::UnknownKeyword { keyword, solver }) => {
                assert_eq!(keyword, "tolerance");
                assert_eq!(solver, "BICGSTAB");
            }
            other => panic!("Expected an unknown keyword error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_solver_and_preconditioner() {
        match SolverConfig::parse_block("PETSC { }") {
            Err(ConfigError::UnknownSolver(name)) => assert_eq!(name, "PETSC"),
            other => panic!("Expected an unknown solver error, got {:?}", other),
        }
        match SolverConfig::parse_block("GCP { precond ilu { level 1 } }") {
            Err(ConfigError::UnknownPreconditioner(name)) => assert_eq!(name, "ilu"),
            other => panic!("Expected an unknown preconditioner error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_brace() {
        assert!(matches!(
            SolverConfig::parse_block("GCP atol 1e-3 }"),
            Err(ConfigError::Expected { .. })
        ));
        assert!(matches!(
            SolverConfig::parse_block("GCP { atol"),
            Err(ConfigError::UnexpectedEnd(_))
        ));
        assert!(matches!(
            SolverConfig::parse_block("GCP { atol small }"),
            Err(ConfigError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_mixed_precision_is_rejected_at_build() {
        let config = SolverConfig::parse_block("GCP { mixed_precision }").unwrap();
        match config.build() {
            Err(BridgeError::Config(ConfigError::MixedPrecision)) => {}
            other => panic!("Expected a mixed precision error, got {:?}", other),
        }
    }

    #[test]
    fn test_json_config_and_build() {
        let config = SolverConfig::from_json(
            r#"{ "solver": "BiCGStab", "preconditioner": "Jacobi", "atol": 1e-9, "impr": true }"#,
        )
        .unwrap();
        assert_eq!(config.rtol, 1e-12);
        let (backend, context) = config.build().unwrap();
        assert_eq!(backend.kind(), SolverKind::BiCgStab);
        assert_eq!(backend.preconditioner_kind(), PreconditionerKind::Jacobi);
        assert_eq!(backend.control().atol, 1e-9);
        assert_eq!(context.atol, 1e-9);
        assert!(context.print_residuals);
        assert!(context.structure_changed());
    }

    #[test]
    fn test_invalid_tolerance() {
        let config = SolverConfig {
            rtol: -1.0,
            ..SolverConfig::default()
        };
        match config.validate() {
            Err(ConfigError::InvalidTolerance { name, .. }) => assert_eq!(name, "rtol"),
            other => panic!("Expected an invalid tolerance error, got {:?}", other),
        }
    }
}
