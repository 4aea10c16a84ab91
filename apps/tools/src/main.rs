use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::domain::CompanyId;
use storage::{NewCompany, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/companies.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    AddCompany {
        name: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        hq: Option<String>,
        #[arg(long)]
        industry: Option<String>,
    },
    ListCompanies,
    RemoveCompany {
        company_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::AddCompany {
            name,
            url,
            hq,
            industry,
        } => {
            let saved = storage
                .add_company(NewCompany {
                    name,
                    url,
                    hq,
                    industry,
                })
                .await?;
            println!("saved company_id={} name={}", saved.id, saved.name);
        }
        Command::ListCompanies => {
            for company in storage.list_companies().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    company.id,
                    company.name,
                    company.url.as_deref().unwrap_or("-"),
                    company.hq.as_deref().unwrap_or("-"),
                    company.industry.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::RemoveCompany { company_id } => {
            let company_id = CompanyId(company_id);
            if !storage.remove_company(&company_id).await? {
                bail!("no saved company with id {company_id}");
            }
            println!("removed company_id={company_id}");
        }
    }

    Ok(())
}
