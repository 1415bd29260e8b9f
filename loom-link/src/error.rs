#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use loom_model::{AdviceId, LayerId, LinkRef, MemberId, Span};
use miette::Diagnostic;
use thiserror::Error;

/// Internal-consistency failures of chain building, linking and reduction.
///
/// These all indicate a broken upstream contract and abort weaving of the compilation.
#[derive(Debug, Error, Diagnostic)]
pub enum LinkError {
    #[error("advice {advice} belongs to layer '{layer}', which has no position in the layer order")]
    #[diagnostic(code(loom::link::unordered_layer))]
    UnorderedLayer {
        advice: AdviceId,
        layer: LayerId,
        #[label("advice declared here")]
        span: Span,
    },

    #[error("member '{member}' is declared more than once in the source")]
    #[diagnostic(code(loom::link::duplicate_member))]
    DuplicateMember { member: MemberId },

    #[error("advice {advice} targets '{member}', which has no declaration to build on")]
    #[diagnostic(
        code(loom::link::missing_declaration),
        help("overrides and replacements need a source declaration or an earlier introduction")
    )]
    MissingDeclaration {
        advice: AdviceId,
        member: MemberId,
        #[label]
        span: Span,
    },

    #[error("member '{member}' is introduced more than once (advice {first} and {second})")]
    #[diagnostic(code(loom::link::duplicate_introduction))]
    DuplicateIntroduction {
        member: MemberId,
        first: AdviceId,
        second: AdviceId,
        #[label("second introduction")]
        span: Span,
    },

    #[error("advice {advice} introduces '{member}', which already exists in the source")]
    #[diagnostic(
        code(loom::link::introduction_conflict),
        help("use a replacement to take the place of an existing declaration")
    )]
    IntroductionConflict {
        advice: AdviceId,
        member: MemberId,
        #[label]
        span: Span,
    },

    #[error("advice {advice} introduces '{member}' after it has already been overridden")]
    #[diagnostic(
        code(loom::link::misplaced_introduction),
        help("the introducing layer must be ordered before every layer overriding the member")
    )]
    MisplacedIntroduction {
        advice: AdviceId,
        member: MemberId,
        #[label]
        span: Span,
    },

    #[error("cannot resolve link '{link}' in '{member}' at position {position}: {reason}")]
    #[diagnostic(code(loom::link::unresolvable))]
    UnresolvableLink {
        link: LinkRef,
        member: MemberId,
        position: String,
        reason: &'static str,
    },

    #[error("reduction of '{member}' changed the target of reference {reference} at position {position}: expected {expected}, found {actual}")]
    #[diagnostic(code(loom::link::reduction_mismatch))]
    ReductionMismatch {
        member: MemberId,
        position: String,
        reference: usize,
        expected: String,
        actual: String,
    },
}
