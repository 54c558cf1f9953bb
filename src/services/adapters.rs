// 関数アダプタ
// 素の関数・クロージャをProducer / Consumerとして使えるようにする

use crate::core::{Consumer, Producer, TransformFailure};
use anyhow::Result;
use std::marker::PhantomData;

/// 失敗し得るクロージャをProducerとして包む
pub struct FnProducer<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<F, I, O> FnProducer<F, I, O>
where
    F: FnMut(I) -> Result<O> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<F, I, O> Producer for FnProducer<F, I, O>
where
    F: FnMut(I) -> Result<O> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    fn produce(&mut self, input: I) -> Result<O> {
        (self.f)(input)
    }
}

impl<F: Clone, I, O> Clone for FnProducer<F, I, O> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            _marker: PhantomData,
        }
    }
}

/// 失敗しないクロージャをProducerとして包む
pub fn producer_fn<I, O, F>(
    mut f: F,
) -> FnProducer<impl FnMut(I) -> Result<O> + Send + Clone + 'static, I, O>
where
    F: FnMut(I) -> O + Send + Clone + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    FnProducer::new(move |input| Ok(f(input)))
}

/// 各アイテムに関数を適用し、結果をVecに集める
pub struct CollectConsumer<F, I, O> {
    f: F,
    collected: Vec<O>,
    _marker: PhantomData<fn(I)>,
}

impl<F, I, O> CollectConsumer<F, I, O>
where
    F: FnMut(I) -> O + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            collected: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> CollectConsumer<fn(T) -> T, T, T>
where
    T: Send + 'static,
{
    /// アイテムをそのまま集める
    pub fn identity() -> Self {
        Self::new(std::convert::identity::<T> as fn(T) -> T)
    }
}

impl<F, I, O> Consumer for CollectConsumer<F, I, O>
where
    F: FnMut(I) -> O + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Item = I;
    type Output = Vec<O>;

    fn setup(&mut self) -> Result<()> {
        self.collected.clear();
        Ok(())
    }

    fn consume(&mut self, item: I) -> Result<()> {
        self.collected.push((self.f)(item));
        Ok(())
    }

    fn complete(self) -> Result<Vec<O>> {
        Ok(self.collected)
    }
}

/// 副作用だけを行うConsumer。結果は処理件数と失敗件数
pub struct FnConsumer<F, I> {
    f: F,
    consumed: usize,
    failures: usize,
    _marker: PhantomData<fn(I)>,
}

impl<F, I> FnConsumer<F, I>
where
    F: FnMut(I) -> Result<()> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            consumed: 0,
            failures: 0,
            _marker: PhantomData,
        }
    }
}

/// `FnConsumer`の集計結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumeCount {
    pub consumed: usize,
    pub failures: usize,
}

impl<F, I> Consumer for FnConsumer<F, I>
where
    F: FnMut(I) -> Result<()> + Send + 'static,
    I: Send + 'static,
{
    type Item = I;
    type Output = ConsumeCount;

    fn consume(&mut self, item: I) -> Result<()> {
        (self.f)(item)?;
        self.consumed += 1;
        Ok(())
    }

    fn consume_failure(&mut self, _failure: &TransformFailure) {
        self.failures += 1;
    }

    fn complete(self) -> Result<ConsumeCount> {
        Ok(ConsumeCount {
            consumed: self.consumed,
            failures: self.failures,
        })
    }
}
