use crate::error::Result;

/// A per-sample preprocessing step.
///
/// Closures `Fn(In) -> Result<Out>` are transforms; steps are chained with
/// [`TransformExt::then`] to build a pipeline.
pub trait Transform<In>: Send + Sync {
    type Out;

    fn apply(&self, input: In) -> Result<Self::Out>;
}

impl<In, Out, F> Transform<In> for F
where
    F: Fn(In) -> Result<Out> + Send + Sync,
{
    type Out = Out;

    #[inline]
    fn apply(&self, input: In) -> Result<Out> {
        self(input)
    }
}

/// Passes its input through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<In> Transform<In> for Identity {
    type Out = In;

    #[inline]
    fn apply(&self, input: In) -> Result<In> {
        Ok(input)
    }
}

/// Runs `A`, then feeds its output to `B`.
#[derive(Debug, Clone, Copy)]
pub struct Then<A, B> {
    first: A,
    second: B,
}

impl<In, A, B> Transform<In> for Then<A, B>
where
    A: Transform<In>,
    B: Transform<A::Out>,
{
    type Out = B::Out;

    fn apply(&self, input: In) -> Result<Self::Out> {
        self.second.apply(self.first.apply(input)?)
    }
}

pub trait TransformExt<In>: Transform<In> + Sized {
    /// Appends `next` to this pipeline.
    fn then<B>(self, next: B) -> Then<Self, B>
    where
        B: Transform<Self::Out>,
    {
        Then {
            first: self,
            second: next,
        }
    }
}

impl<In, T: Transform<In>> TransformExt<In> for T {}
